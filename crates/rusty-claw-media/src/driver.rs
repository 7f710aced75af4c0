//! The OS audio capture/playback driver, modelled as a trait so the pipeline
//! can be exercised against fakes without real hardware. A concrete driver
//! (cpal or platform-native) is wired in by the binary; it is not part of
//! this crate.

use rusty_claw_core::error::Result;

/// Capture callback contract: the driver calls this with one frame of
/// interleaved 16-bit little-endian mono PCM samples per capture period.
pub type CaptureCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Playback callback contract: the driver calls this to fill one output
/// buffer of interleaved 16-bit little-endian mono PCM samples. The callback
/// writes as many bytes as it has available and zero-fills the rest.
pub type PlaybackCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// A running capture or playback stream. Dropping it stops the underlying
/// hardware stream.
pub trait AudioStream: Send {}

/// Capture/playback device access, abstracted behind a trait at the seam
/// between this crate's pipeline logic and the host's real audio hardware.
pub trait AudioDriver {
    /// Start capturing at `sample_rate` Hz mono, delivering frames to `callback`.
    fn start_capture(
        &self,
        sample_rate: u32,
        callback: CaptureCallback,
    ) -> Result<Box<dyn AudioStream>>;

    /// Start playback at `sample_rate` Hz mono, pulling frames from `callback`.
    fn start_playback(
        &self,
        sample_rate: u32,
        callback: PlaybackCallback,
    ) -> Result<Box<dyn AudioStream>>;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory fake driver for exercising capture/playback logic in
    //! tests without touching real hardware.
    use std::sync::{Arc, Mutex};

    use super::{AudioDriver, AudioStream, CaptureCallback, PlaybackCallback};
    use rusty_claw_core::error::Result;

    pub struct FakeStream;
    impl AudioStream for FakeStream {}

    /// A fake driver that hands its capture/playback callbacks back out so
    /// a test can drive them directly, standing in for real hardware frames.
    #[derive(Default)]
    pub struct FakeDriver {
        pub capture_callback: Arc<Mutex<Option<CaptureCallback>>>,
        pub playback_callback: Arc<Mutex<Option<PlaybackCallback>>>,
    }

    impl FakeDriver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Drive a previously-started capture stream with one frame.
        pub fn push_capture_frame(&self, frame: &[u8]) {
            if let Some(cb) = self.capture_callback.lock().unwrap().as_mut() {
                cb(frame);
            }
        }

        /// Pull one playback frame of `len` bytes from the previously-started
        /// playback stream.
        pub fn pull_playback_frame(&self, len: usize) -> Vec<u8> {
            let mut buf = vec![0u8; len];
            if let Some(cb) = self.playback_callback.lock().unwrap().as_mut() {
                cb(&mut buf);
            }
            buf
        }
    }

    impl AudioDriver for FakeDriver {
        fn start_capture(
            &self,
            _sample_rate: u32,
            callback: CaptureCallback,
        ) -> Result<Box<dyn AudioStream>> {
            *self.capture_callback.lock().unwrap() = Some(callback);
            Ok(Box::new(FakeStream))
        }

        fn start_playback(
            &self,
            _sample_rate: u32,
            callback: PlaybackCallback,
        ) -> Result<Box<dyn AudioStream>> {
            *self.playback_callback.lock().unwrap() = Some(callback);
            Ok(Box::new(FakeStream))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[test]
        fn push_capture_frame_reaches_registered_callback() {
            let driver = FakeDriver::new();
            let received = Arc::new(Mutex::new(Vec::new()));
            let sink = received.clone();
            driver
                .start_capture(8000, Box::new(move |bytes: &[u8]| sink.lock().unwrap().extend_from_slice(bytes)))
                .unwrap();

            driver.push_capture_frame(&[1, 2, 3]);
            assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
        }

        #[test]
        fn pull_playback_frame_invokes_registered_callback_once() {
            let driver = FakeDriver::new();
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = calls.clone();
            driver
                .start_playback(
                    24000,
                    Box::new(move |out: &mut [u8]| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        out.fill(7);
                    }),
                )
                .unwrap();

            let frame = driver.pull_playback_frame(4);
            assert_eq!(frame, vec![7, 7, 7, 7]);
            assert_eq!(calls.load(Ordering::Relaxed), 1);
        }

        #[test]
        fn pull_playback_frame_with_no_registered_callback_returns_zeros() {
            let driver = FakeDriver::new();
            assert_eq!(driver.pull_playback_frame(3), vec![0, 0, 0]);
        }
    }
}
