//! Playback Loop: a shared ring buffer the driver's output callback drains
//! on demand, fed by model output chunks, and cleared instantly on barge-in.
//!
//! Grounded on the teacher's shared-mutex event-queue pattern
//! (`rusty-claw-gateway/src/connection.rs`) and on the drain-or-zero-fill
//! output callback shape from `other_examples/.../audio_output.rs`'s
//! `build_output_stream`, adapted from an `i16` buffer to a byte ring buffer.
//!
//! Per the open sample-rate question this repo resolves explicitly: the
//! model streams response audio as 24 kHz 16-bit PCM, and this loop plays it
//! back at 24 kHz directly — it does not decode it as 8 kHz µ-law, which was
//! the source implementation's unfixed bug (see `handleResponse`'s own
//! comment about skipping playback for exactly this reason).
//!
//! `is_playing` is owned by this loop: a new chunk arriving sets it, and the
//! barge-in interrupt clears it in the same step as clearing the ring, so the
//! capture loop's barge-in check always sees a state consistent with what's
//! actually buffered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::driver::{AudioDriver, AudioStream};
use rusty_claw_core::error::Result;

/// Output sample rate the remote model streams audio at.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// A byte ring buffer shared between the async feeder task and the (likely
/// realtime-thread) driver output callback.
#[derive(Clone, Default)]
pub struct PlaybackRing {
    inner: Arc<Mutex<VecDeque<u8>>>,
}

impl PlaybackRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly-arrived PCM bytes to the tail of the buffer.
    pub fn push(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().unwrap();
        buf.extend(bytes.iter().copied());
    }

    /// Discard all buffered audio — the barge-in path.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Fill `output` from the buffer, draining what's available and
    /// zero-filling the rest. This is the driver callback body.
    pub fn drain_into(&self, output: &mut [u8]) {
        let mut buf = self.inner.lock().unwrap();
        if buf.len() >= output.len() {
            for slot in output.iter_mut() {
                *slot = buf.pop_front().unwrap();
            }
        } else {
            let available = buf.len();
            for (i, slot) in output.iter_mut().enumerate() {
                *slot = if i < available {
                    buf.pop_front().unwrap()
                } else {
                    0
                };
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Start the playback stream against a real driver and the feeder task that
/// owns the ring buffer: new output chunks append and mark `is_playing`, a
/// barge-in interrupt clears the ring and `is_playing` together, and
/// shutdown stops the stream.
pub fn spawn<D: AudioDriver>(
    driver: &D,
    is_playing: Arc<AtomicBool>,
    mut chunk_rx: mpsc::Receiver<Vec<u8>>,
    mut interrupt_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) -> Result<(Box<dyn AudioStream>, PlaybackRing)> {
    let ring = PlaybackRing::new();
    let driver_ring = ring.clone();

    let stream = driver.start_playback(
        PLAYBACK_SAMPLE_RATE,
        Box::new(move |output: &mut [u8]| {
            driver_ring.drain_into(output);
        }),
    )?;

    let feeder_ring = ring.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("playback loop shutting down");
                    break;
                }
                Some(()) = interrupt_rx.recv() => {
                    feeder_ring.clear();
                    is_playing.store(false, Ordering::Relaxed);
                    debug!("barge-in: cleared playback ring and is_playing");
                }
                Some(chunk) = chunk_rx.recv() => {
                    feeder_ring.push(&chunk);
                    is_playing.store(true, Ordering::Relaxed);
                }
                else => break,
            }
        }
    });

    Ok((stream, ring))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_into_zero_fills_when_buffer_short() {
        let ring = PlaybackRing::new();
        ring.push(&[1, 2, 3]);
        let mut output = [0xAAu8; 6];
        ring.drain_into(&mut output);
        assert_eq!(output, [1, 2, 3, 0, 0, 0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn drain_into_consumes_exactly_requested_length() {
        let ring = PlaybackRing::new();
        ring.push(&[1, 2, 3, 4, 5, 6]);
        let mut output = [0u8; 4];
        ring.drain_into(&mut output);
        assert_eq!(output, [1, 2, 3, 4]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn clear_drops_all_buffered_audio() {
        let ring = PlaybackRing::new();
        ring.push(&[1, 2, 3, 4]);
        ring.clear();
        assert!(ring.is_empty());
        let mut output = [0xFFu8; 4];
        ring.drain_into(&mut output);
        assert_eq!(output, [0, 0, 0, 0]);
    }
}
