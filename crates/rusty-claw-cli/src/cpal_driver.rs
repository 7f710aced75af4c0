//! The concrete OS audio driver, backed by `cpal`. This is the one piece of
//! the pipeline the rest of the workspace treats as out of scope — it only
//! has to satisfy `rusty_claw_media::driver::AudioDriver` so the real
//! binary has something to run against; `cpal` itself is not exercised in
//! any of this workspace's own tests.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rusty_claw_core::error::{Result, RustyClawError};
use rusty_claw_media::driver::{AudioDriver, AudioStream, CaptureCallback, PlaybackCallback};
use tracing::error;

pub struct CpalStream(#[allow(dead_code)] cpal::Stream);
impl AudioStream for CpalStream {}

pub struct CpalDriver {
    host: cpal::Host,
}

impl CpalDriver {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDriver for CpalDriver {
    fn start_capture(
        &self,
        sample_rate: u32,
        mut callback: CaptureCallback,
    ) -> Result<Box<dyn AudioStream>> {
        let device = self
            .host
            .default_input_device()
            .ok_or_else(|| RustyClawError::Audio("no input device available".into()))?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                    callback(&bytes);
                },
                |err| error!(error = %err, "capture stream error"),
                None,
            )
            .map_err(|e| RustyClawError::Audio(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| RustyClawError::Audio(format!("failed to start capture: {e}")))?;

        Ok(Box::new(CpalStream(stream)))
    }

    fn start_playback(
        &self,
        sample_rate: u32,
        mut callback: PlaybackCallback,
    ) -> Result<Box<dyn AudioStream>> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| RustyClawError::Audio("no output device available".into()))?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    let mut bytes = vec![0u8; data.len() * 2];
                    callback(&mut bytes);
                    for (sample, chunk) in data.iter_mut().zip(bytes.chunks_exact(2)) {
                        *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    }
                },
                |err| error!(error = %err, "playback stream error"),
                None,
            )
            .map_err(|e| RustyClawError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| RustyClawError::Audio(format!("failed to start playback: {e}")))?;

        Ok(Box::new(CpalStream(stream)))
    }
}
