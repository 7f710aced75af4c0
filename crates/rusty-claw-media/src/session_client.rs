//! Bidirectional session protocol client for the remote speech-to-speech
//! model: a newline-delimited-JSON event stream over a single streaming HTTP
//! request, signed with AWS SigV4.
//!
//! Grounded on the original Go client's event sequence (`sessionStart` →
//! `promptStart` → system prompt → repeated audio content blocks →
//! `promptEnd`/`sessionEnd`), adapted here to tokio/reqwest: the request body
//! is fed by an mpsc channel turned into a body stream, so events can be
//! written while the response is still being read — the same shape the
//! original gets from `io.Pipe`.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use bytes::Bytes;
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;
use tracing::{debug, warn};

use rusty_claw_core::config::VoiceConfig;
use rusty_claw_core::error::{Result, RustyClawError};

use crate::signing::{self, AwsCredentials};

/// Lifecycle of a session, advanced strictly in this order up to `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    SessionReady,
    PromptReady,
    SystemSent,
    AudioOpen,
    Closing,
}

/// A demultiplexed response event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// `textOutput`: a transcript (role USER) or model reply (role ASSISTANT).
    Text { role: String, content: String },
    /// `audioOutput`: raw decoded audio bytes (24 kHz, 16-bit PCM).
    Audio { pcm: Vec<u8> },
}

/// Generates unique, monotonically-ordered content ids without relying on
/// randomness — a nanosecond timestamp plus a per-process counter to break
/// ties within the same tick.
struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self, prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{nanos}_{seq}")
    }
}

/// A connected bidirectional session with the remote model.
pub struct SessionClient {
    event_tx: mpsc::Sender<Bytes>,
    responses: Pin<Box<dyn Stream<Item = Result<Value>> + Send>>,
    ids: IdGenerator,
    prompt_name: String,
    state: SessionState,
}

impl SessionClient {
    /// Open the HTTP connection and perform the fixed setup sequence:
    /// sessionStart, promptStart, and the SYSTEM text content block.
    pub async fn connect(config: &VoiceConfig, credentials: AwsCredentials) -> Result<Self> {
        let region = config.region();
        let host = format!("bedrock-runtime.{region}.amazonaws.com");
        let path = format!(
            "/model/{}/invoke-with-bidirectional-stream",
            config.model_id()
        );
        let url = format!("https://{host}{path}");

        let amz_date = amz_date_now();
        let signed = signing::sign_request(&credentials, &region, "POST", &host, &path, &amz_date)?;

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let body_stream = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
        let body = reqwest::Body::wrap_stream(body_stream);

        let client = reqwest::Client::new();
        let mut request = client
            .post(&url)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .header("x-amz-date", &signed.x_amz_date)
            .header("x-amz-content-sha256", &signed.x_amz_content_sha256)
            .header("authorization", &signed.authorization);
        if let Some(token) = &signed.x_amz_security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| RustyClawError::Protocol(format!("connection failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(RustyClawError::Protocol(format!(
                "session open rejected: {status} {body_text}"
            )));
        }

        let responses = ndjson_stream(response);

        let mut client = Self {
            event_tx: tx,
            responses: Box::pin(responses),
            ids: IdGenerator::new(),
            prompt_name: String::new(),
            state: SessionState::Opening,
        };

        client.prompt_name = client.ids.next("prompt");
        client.send_session_start(config).await?;
        client.send_prompt_start(config).await?;
        client.send_system_prompt(config).await?;

        Ok(client)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    async fn send_event(&self, event: Value) -> Result<()> {
        if self.state == SessionState::Closing {
            return Err(RustyClawError::Protocol(
                "cannot send events after close".into(),
            ));
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.event_tx
            .send(Bytes::from(line))
            .await
            .map_err(|_| RustyClawError::Protocol("session write failed: channel closed".into()))
    }

    async fn send_session_start(&mut self, config: &VoiceConfig) -> Result<()> {
        self.send_event(json!({
            "event": {
                "sessionStart": {
                    "inferenceConfiguration": {
                        "maxTokens": config.max_tokens(),
                        "topP": config.top_p(),
                        "temperature": config.temperature(),
                    }
                }
            }
        }))
        .await?;
        self.state = SessionState::SessionReady;
        Ok(())
    }

    async fn send_prompt_start(&mut self, config: &VoiceConfig) -> Result<()> {
        self.send_event(json!({
            "event": {
                "promptStart": {
                    "promptName": self.prompt_name,
                    "textOutputConfiguration": { "mediaType": "text/plain" },
                    "audioOutputConfiguration": {
                        "mediaType": "audio/lpcm",
                        "sampleRateHertz": 24000,
                        "sampleSizeBits": 16,
                        "channelCount": 1,
                        "voiceId": config.voice_id(),
                        "encoding": "base64",
                        "audioType": "SPEECH",
                    }
                }
            }
        }))
        .await?;
        self.state = SessionState::PromptReady;
        Ok(())
    }

    async fn send_system_prompt(&mut self, config: &VoiceConfig) -> Result<()> {
        let content_name = self.ids.next("content");
        self.send_event(json!({
            "event": {
                "contentStart": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "type": "TEXT",
                    "interactive": true,
                    "role": "SYSTEM",
                    "textInputConfiguration": { "mediaType": "text/plain" },
                }
            }
        }))
        .await?;

        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| "You are a friendly, concise voice assistant.".to_string());
        self.send_event(json!({
            "event": {
                "textInput": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "content": system_prompt,
                }
            }
        }))
        .await?;

        self.send_event(json!({
            "event": {
                "contentEnd": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                }
            }
        }))
        .await?;

        self.state = SessionState::SystemSent;
        Ok(())
    }

    /// Open a fresh audio content block and return its content name. Call
    /// this once per utterance, and again every ~100ms while the utterance
    /// continues, each time with a freshly generated content name.
    ///
    /// `sample_rate` must match the actual rate of the PCM this content
    /// block will carry — the input declaration is honest about the
    /// capture rate rather than mislabeling it.
    pub async fn start_audio_input(&mut self, sample_rate: u32) -> Result<String> {
        let content_name = self.ids.next("audio");
        self.send_event(json!({
            "event": {
                "contentStart": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "type": "AUDIO",
                    "interactive": true,
                    "role": "USER",
                    "audioInputConfiguration": {
                        "mediaType": "audio/lpcm",
                        "sampleRateHertz": sample_rate,
                        "sampleSizeBits": 16,
                        "channelCount": 1,
                        "audioType": "SPEECH",
                        "encoding": "base64",
                    }
                }
            }
        }))
        .await?;
        self.state = SessionState::AudioOpen;
        Ok(content_name)
    }

    /// Send one chunk of linear PCM audio (base64-encoded) on an open
    /// content block.
    pub async fn send_audio_chunk(&self, content_name: &str, pcm: &[u8]) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(pcm);
        self.send_event(json!({
            "event": {
                "audioInput": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                    "content": encoded,
                }
            }
        }))
        .await
    }

    /// Close an audio content block (restart a new one with
    /// `start_audio_input` to continue the utterance).
    pub async fn end_audio_input(&self, content_name: &str) -> Result<()> {
        self.send_event(json!({
            "event": {
                "contentEnd": {
                    "promptName": self.prompt_name,
                    "contentName": content_name,
                }
            }
        }))
        .await
    }

    /// Pull the next demultiplexed response event, or `None` on clean EOF.
    /// A single malformed response document is logged and skipped rather
    /// than treated as fatal.
    pub async fn next_event(&mut self) -> Option<ResponseEvent> {
        loop {
            match self.responses.next().await {
                None => return None,
                Some(Err(e)) => {
                    warn!(error = %e, "malformed session response, skipping");
                    continue;
                }
                Some(Ok(doc)) => {
                    if let Some(event) = demux(&doc) {
                        return Some(event);
                    }
                    // Recognized envelope, unrecognized/irrelevant key — skip.
                }
            }
        }
    }

    /// Send `promptEnd`/`sessionEnd` and close the request body. The caller
    /// should keep draining `next_event` until it returns `None` afterward.
    pub async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closing;
        let _ = self
            .event_tx
            .send(Bytes::from(
                serde_json::to_vec(&json!({
                    "event": { "promptEnd": { "promptName": self.prompt_name } }
                }))
                .unwrap_or_default(),
            ))
            .await;
        let _ = self
            .event_tx
            .send(Bytes::from(
                serde_json::to_vec(&json!({ "event": { "sessionEnd": {} } })).unwrap_or_default(),
            ))
            .await;
        Ok(())
    }
}

fn demux(doc: &Value) -> Option<ResponseEvent> {
    let event = doc.get("event")?;

    if let Some(text) = event.get("textOutput") {
        let content = text.get("content")?.as_str()?.to_string();
        let role = text.get("role").and_then(|v| v.as_str()).unwrap_or("").to_string();
        return Some(ResponseEvent::Text { role, content });
    }

    if let Some(audio) = event.get("audioOutput") {
        let content = audio.get("content")?.as_str()?;
        match base64::engine::general_purpose::STANDARD.decode(content) {
            Ok(pcm) if !pcm.is_empty() => return Some(ResponseEvent::Audio { pcm }),
            Ok(_) => return None,
            Err(e) => {
                debug!(error = %e, "failed to decode base64 audio payload");
                return None;
            }
        }
    }

    None
}

/// Parse a streaming HTTP response body as newline-delimited JSON documents.
fn ndjson_stream(response: reqwest::Response) -> impl Stream<Item = Result<Value>> {
    let byte_stream = response.bytes_stream();

    futures::stream::unfold(
        NdjsonState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line = state.buffer[..newline_pos].trim().to_string();
                    state.buffer = state.buffer[newline_pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = serde_json::from_str::<Value>(&line)
                        .map_err(|e| RustyClawError::Protocol(format!("bad response line: {e}")));
                    return Some((parsed, state));
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(RustyClawError::Protocol(format!("response stream error: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        let remaining = state.buffer.trim().to_string();
                        if remaining.is_empty() {
                            return None;
                        }
                        state.buffer.clear();
                        let parsed = serde_json::from_str::<Value>(&remaining).map_err(|e| {
                            RustyClawError::Protocol(format!("bad trailing response line: {e}"))
                        });
                        return Some((parsed, state));
                    }
                }
            }
        },
    )
}

struct NdjsonState {
    byte_stream: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
}

/// Current UTC time as an ISO8601 basic-format SigV4 timestamp.
fn amz_date_now() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let datetime = chrono::DateTime::<chrono::Utc>::from(UNIX_EPOCH + now);
    datetime.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_produces_unique_ids() {
        let gen = IdGenerator::new();
        let a = gen.next("content");
        let b = gen.next("content");
        assert_ne!(a, b);
        assert!(a.starts_with("content_"));
    }

    #[test]
    fn demux_recognizes_text_output() {
        let doc = json!({
            "event": { "textOutput": { "content": "hello", "role": "ASSISTANT" } }
        });
        match demux(&doc) {
            Some(ResponseEvent::Text { role, content }) => {
                assert_eq!(role, "ASSISTANT");
                assert_eq!(content, "hello");
            }
            other => panic!("expected Text event, got {other:?}"),
        }
    }

    #[test]
    fn demux_recognizes_audio_output() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1, 2, 3]);
        let doc = json!({ "event": { "audioOutput": { "content": encoded } } });
        match demux(&doc) {
            Some(ResponseEvent::Audio { pcm }) => assert_eq!(pcm, vec![1, 2, 3]),
            other => panic!("expected Audio event, got {other:?}"),
        }
    }

    #[test]
    fn demux_ignores_unknown_event_keys() {
        let doc = json!({ "event": { "somethingElse": {} } });
        assert!(demux(&doc).is_none());
    }

    #[test]
    fn demux_ignores_non_envelope_documents() {
        let doc = json!({ "notAnEvent": true });
        assert!(demux(&doc).is_none());
    }
}
