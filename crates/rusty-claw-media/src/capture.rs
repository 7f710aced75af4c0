//! Capture Loop: turns raw driver callback bytes into VAD-gated µ-law
//! utterances, and raises a barge-in interrupt the instant speech starts
//! while the remote model's audio is playing.
//!
//! The state machine (`CaptureState`) is plain, synchronous, and unit
//! tested directly; `spawn` wires it to a real `AudioDriver` and tokio
//! channels, grounded on the teacher's `VoiceSession::run`/`process_audio`
//! select loop. The teacher's loop buffers linear PCM and never actually
//! emits a completed utterance on VAD speech-end; this one closes that gap
//! by accumulating µ-law bytes directly and emitting on `SpeechEnd`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::driver::{AudioDriver, AudioStream};
use crate::vad::{VadConfig, VadDetector, VadState};
use rusty_claw_core::error::Result;

/// A completed utterance: µ-law-encoded audio captured between VAD speech
/// start and speech end.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub mulaw: Vec<u8>,
    pub duration_ms: u64,
}

/// An event produced while feeding capture audio through the VAD.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Speech just started — a barge-in candidate if output is playing.
    SpeechStarted,
    /// An utterance completed and is ready to send to the model.
    UtteranceComplete(Utterance),
}

/// Pure, synchronous capture state machine: accumulate PCM into VAD-sized
/// frames, transcode to µ-law while speech is active, and emit on speech end.
pub struct CaptureState {
    vad: VadDetector,
    sample_buffer: Vec<i16>,
    frame_size: usize,
    sample_rate: u32,
    current_utterance: Vec<u8>,
}

impl CaptureState {
    pub fn new(vad_config: VadConfig) -> Self {
        let frame_size = vad_config.frame_size;
        let sample_rate = vad_config.sample_rate;
        Self {
            vad: VadDetector::new(vad_config),
            sample_buffer: Vec::new(),
            frame_size,
            sample_rate,
            current_utterance: Vec::new(),
        }
    }

    /// Feed one callback's worth of interleaved 16-bit LE PCM bytes. A
    /// callback may span more than one VAD frame, so this can yield more
    /// than one event.
    pub fn process_bytes(&mut self, bytes: &[u8]) -> Vec<CaptureEvent> {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.sample_buffer.extend_from_slice(&samples);

        let mut events = Vec::new();
        while self.sample_buffer.len() >= self.frame_size {
            let frame: Vec<i16> = self.sample_buffer.drain(..self.frame_size).collect();
            match self.vad.detect(&frame) {
                VadState::Silence => {
                    // Nothing accumulating outside of speech.
                }
                VadState::Speech => {
                    let was_empty = self.current_utterance.is_empty();
                    self.current_utterance
                        .extend(codec::encode_frame(&frame));
                    if was_empty {
                        events.push(CaptureEvent::SpeechStarted);
                    }
                }
                VadState::SpeechEnd => {
                    self.current_utterance.extend(codec::encode_frame(&frame));
                    let mulaw = std::mem::take(&mut self.current_utterance);
                    let duration_ms = (mulaw.len() as u64 * 1000) / self.sample_rate as u64;
                    events.push(CaptureEvent::UtteranceComplete(Utterance {
                        mulaw,
                        duration_ms,
                    }));
                }
            }
        }
        events
    }

    /// Discard any partially-accumulated utterance (used on shutdown).
    pub fn discard_partial(&mut self) {
        self.current_utterance.clear();
        self.sample_buffer.clear();
        self.vad.reset();
    }
}

/// Start the capture stream against a real driver, wiring its callback to
/// the `CaptureState` machine. Speech-start while `is_playing` is true fires
/// a non-blocking, drop-if-full interrupt; completed utterances are sent
/// with backpressure (the caller is expected to keep the channel drained).
pub fn spawn<D: AudioDriver>(
    driver: &D,
    vad_config: VadConfig,
    is_playing: Arc<AtomicBool>,
    utterance_tx: mpsc::Sender<Utterance>,
    interrupt_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> Result<Box<dyn AudioStream>> {
    let sample_rate = vad_config.sample_rate;
    let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<u8>>(64);

    let stream = driver.start_capture(
        sample_rate,
        Box::new(move |bytes: &[u8]| {
            if raw_tx.try_send(bytes.to_vec()).is_err() {
                warn!("capture callback backlog full, dropping frame");
            }
        }),
    )?;

    tokio::spawn(async move {
        let mut state = CaptureState::new(vad_config);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    state.discard_partial();
                    info!("capture loop shutting down, discarding partial utterance");
                    break;
                }
                frame = raw_rx.recv() => {
                    match frame {
                        Some(bytes) => {
                            for event in state.process_bytes(&bytes) {
                                match event {
                                    CaptureEvent::SpeechStarted => {
                                        if is_playing.load(Ordering::Relaxed) {
                                            if interrupt_tx.try_send(()).is_err() {
                                                debug!("interrupt already pending, dropping duplicate");
                                            }
                                        }
                                    }
                                    CaptureEvent::UtteranceComplete(utterance) => {
                                        if utterance_tx.send(utterance).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    Ok(stream)
}
