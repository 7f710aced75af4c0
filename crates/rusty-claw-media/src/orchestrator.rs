//! Agent Orchestrator: owns the driver, VAD, session client, and
//! conversation context, and wires the four concurrent activities (capture,
//! playback, session-send, session-receive) together.
//!
//! Grounded on `rusty-claw-agent::runtime::run_agent`'s shape ("wire
//! channels, drive a remote stream, update a shared session, emit events")
//! and on `rusty-claw-core::session::Session`/`TranscriptEntry` for the
//! conversation-context shape, narrowed here to the two-role, optional-
//! audio/optional-text message this system actually needs.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rusty_claw_core::config::VoiceConfig;
use rusty_claw_core::error::Result;

use crate::capture;
use crate::codec;
use crate::driver::AudioDriver;
use crate::playback;
use crate::session_client::{ResponseEvent, SessionClient};
use crate::signing::AwsCredentials;
use crate::vad::VadConfig;

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One turn in the conversation: a transcribed/spoken utterance, with an
/// optional text transcript (text arrives from the model asynchronously and
/// may never arrive for a given turn).
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: Option<String>,
    pub has_audio: bool,
}

/// In-memory transcript of the current voice session.
pub struct ConversationContext {
    session_id: String,
    started_at: Instant,
    messages: Vec<ConversationMessage>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            messages: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn append_user_message(&mut self, text: Option<String>, has_audio: bool) {
        self.messages.push(ConversationMessage {
            role: Role::User,
            text,
            has_audio,
        });
    }

    pub fn append_assistant_message(&mut self, text: Option<String>) {
        self.messages.push(ConversationMessage {
            role: Role::Assistant,
            text,
            has_audio: false,
        });
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
    }

    /// Start a fresh session: new id, empty history, same start-of-uptime
    /// clock reset.
    pub fn reset_session(&mut self) {
        self.session_id = Uuid::new_v4().to_string();
        self.messages.clear();
        self.started_at = Instant::now();
    }

    /// `(session_id, message_count, uptime)`.
    pub fn summary(&self) -> (String, usize, Duration) {
        (
            self.session_id.clone(),
            self.messages.len(),
            self.started_at.elapsed(),
        )
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

fn vad_config_from(voice: &VoiceConfig) -> VadConfig {
    let defaults = VadConfig::default();
    let Some(tuning) = &voice.vad else {
        return defaults;
    };
    VadConfig {
        energy_threshold: tuning.energy_threshold.unwrap_or(defaults.energy_threshold),
        speech_start_frames: tuning.speech_start_frames.unwrap_or(defaults.speech_start_frames),
        speech_end_frames: tuning.speech_end_frames.unwrap_or(defaults.speech_end_frames),
        sample_rate: tuning.sample_rate.unwrap_or(defaults.sample_rate),
        frame_size: tuning.frame_size.unwrap_or(defaults.frame_size),
    }
}

/// Runs the full capture → model → playback loop until shutdown is
/// requested or a fatal error occurs, returning the final conversation
/// context.
pub async fn run<D: AudioDriver + Send + Sync + 'static>(
    driver: D,
    config: VoiceConfig,
    credentials: AwsCredentials,
    shutdown: CancellationToken,
) -> Result<ConversationContext> {
    let vad_config = vad_config_from(&config);
    let capture_sample_rate = vad_config.sample_rate;

    let (utterance_tx, mut utterance_rx) = mpsc::channel::<capture::Utterance>(10);
    let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(100);
    let (interrupt_tx, interrupt_rx) = mpsc::channel::<()>(1);
    let is_playing = Arc::new(AtomicBool::new(false));

    let _capture_stream = capture::spawn(
        &driver,
        vad_config,
        is_playing.clone(),
        utterance_tx,
        interrupt_tx,
        shutdown.clone(),
    )?;
    let (_playback_stream, _ring) =
        playback::spawn(&driver, is_playing.clone(), chunk_rx, interrupt_rx, shutdown.clone())?;

    let mut session = SessionClient::connect(&config, credentials).await?;
    let mut context = ConversationContext::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("orchestrator shutting down");
                break;
            }
            utterance = utterance_rx.recv() => {
                match utterance {
                    Some(utterance) => {
                        if config.debug_wav_dump {
                            dump_input_wav(&utterance);
                        }
                        if let Err(e) = send_utterance(&mut session, capture_sample_rate, &utterance).await {
                            error!(error = %e, "fatal error sending utterance to model");
                            return Err(e);
                        }
                        context.append_user_message(None, true);
                    }
                    None => {
                        warn!("capture channel closed unexpectedly");
                        break;
                    }
                }
            }
            event = session.next_event() => {
                match event {
                    Some(ResponseEvent::Text { role, content }) => {
                        debug!(%role, %content, "received text from model");
                        if role.eq_ignore_ascii_case("assistant") {
                            context.append_assistant_message(Some(content));
                        }
                    }
                    Some(ResponseEvent::Audio { pcm }) => {
                        // `is_playing` is set by the playback loop itself
                        // when it actually buffers the chunk, and cleared
                        // there on barge-in — see playback::spawn.
                        if chunk_tx.send(pcm).await.is_err() {
                            warn!("playback channel closed, dropping audio chunk");
                        }
                    }
                    None => {
                        info!("model closed the session stream");
                        break;
                    }
                }
            }
        }
    }

    let _ = session.close().await;
    drain_to_eof(&mut session).await;
    Ok(context)
}

/// After `close()`, the request body is shut down but the response stream
/// isn't: keep pulling events until it reports EOF (`None`) so the
/// connection's read side actually finishes instead of being dropped
/// mid-stream. The `shutdown` token is typically already cancelled by the
/// time this runs, so it can't bound this wait — a hard timeout does
/// instead, long enough for the model to flush its closing events.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn drain_to_eof(session: &mut SessionClient) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, session.next_event()).await {
            Ok(Some(_)) => continue,
            Ok(None) => {
                debug!("response stream reached EOF after close");
                break;
            }
            Err(_) => {
                warn!("timed out draining response stream to EOF after close");
                break;
            }
        }
    }
}

/// Debug aid carried forward from the original recorder: dump a completed
/// utterance's raw µ-law audio to `output/input_<unix_ms>.wav`. Failures are
/// logged and otherwise ignored — this never interrupts the conversation.
fn dump_input_wav(utterance: &capture::Utterance) {
    let dir = Path::new("output");
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(error = %e, "failed to create debug wav output directory");
        return;
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = dir.join(format!("input_{millis}.wav"));
    let wav = codec::write_mulaw_wav(&utterance.mulaw);
    if let Err(e) = std::fs::write(&path, wav) {
        warn!(error = %e, path = %path.display(), "failed to write debug wav dump");
    } else {
        debug!(path = %path.display(), "wrote debug wav dump");
    }
}

/// Decode an utterance's µ-law audio back to linear PCM and send it to the
/// model as a single audio content block, declaring the true capture rate.
async fn send_utterance(
    session: &mut SessionClient,
    sample_rate: u32,
    utterance: &capture::Utterance,
) -> Result<()> {
    let pcm_bytes = codec::decode_frame_to_bytes(&utterance.mulaw);
    let content_name = session.start_audio_input(sample_rate).await?;
    session.send_audio_chunk(&content_name, &pcm_bytes).await?;
    session.end_audio_input(&content_name).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_context_tracks_messages_and_session_id() {
        let mut ctx = ConversationContext::new();
        let (session_id, count, _uptime) = ctx.summary();
        assert_eq!(count, 0);
        assert!(!session_id.is_empty());

        ctx.append_user_message(None, true);
        ctx.append_assistant_message(Some("hi there".to_string()));
        assert_eq!(ctx.history().len(), 2);
        assert_eq!(ctx.history()[1].text.as_deref(), Some("hi there"));
    }

    #[test]
    fn reset_session_clears_history_and_changes_id() {
        let mut ctx = ConversationContext::new();
        let original_id = ctx.session_id().to_string();
        ctx.append_user_message(Some("hello".to_string()), false);

        ctx.reset_session();

        assert!(ctx.history().is_empty());
        assert_ne!(ctx.session_id(), original_id);
    }

    #[test]
    fn clear_history_keeps_session_id() {
        let mut ctx = ConversationContext::new();
        let id = ctx.session_id().to_string();
        ctx.append_user_message(None, true);
        ctx.clear_history();
        assert!(ctx.history().is_empty());
        assert_eq!(ctx.session_id(), id);
    }

    #[test]
    fn vad_config_from_applies_overrides_and_falls_back_to_defaults() {
        use rusty_claw_core::config::VadTuning;

        let mut voice = VoiceConfig::default();
        voice.vad = Some(VadTuning {
            energy_threshold: Some(1000.0),
            speech_start_frames: None,
            speech_end_frames: None,
            sample_rate: None,
            frame_size: None,
        });

        let vc = vad_config_from(&voice);
        assert_eq!(vc.energy_threshold, 1000.0);
        assert_eq!(vc.speech_start_frames, VadConfig::default().speech_start_frames);
    }
}
