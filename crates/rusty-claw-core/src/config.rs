//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Rusty Claw Voice configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Voice agent configuration: remote model endpoint, credentials, and VAD tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Bedrock-style model id (default: "amazon.nova-sonic-v1:0").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// AWS region the model endpoint is hosted in (default: "us-east-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Synthesis voice id (default: "matthew").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    /// System prompt sent as the SYSTEM text content at session start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Explicit AWS access key id; falls back to `access_key_id_env`, then
    /// the ambient `AWS_ACCESS_KEY_ID` environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token_env: Option<String>,

    /// VAD tuning. Missing fields fall back to the detector's own defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad: Option<VadTuning>,

    /// Write `output/input_<ts>.wav` and `output/response_<ts>.wav` debug dumps.
    #[serde(default)]
    pub debug_wav_dump: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            region: None,
            voice_id: None,
            system_prompt: None,
            max_tokens: None,
            top_p: None,
            temperature: None,
            access_key_id: None,
            access_key_id_env: None,
            secret_access_key: None,
            secret_access_key_env: None,
            session_token: None,
            session_token_env: None,
            vad: None,
            debug_wav_dump: false,
        }
    }
}

impl VoiceConfig {
    pub fn model_id(&self) -> String {
        self.model_id
            .clone()
            .unwrap_or_else(|| "amazon.nova-sonic-v1:0".to_string())
    }

    pub fn region(&self) -> String {
        self.region.clone().unwrap_or_else(|| "us-east-1".to_string())
    }

    pub fn voice_id(&self) -> String {
        self.voice_id.clone().unwrap_or_else(|| "matthew".to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(1024)
    }

    pub fn top_p(&self) -> f64 {
        self.top_p.unwrap_or(0.9)
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(0.7)
    }

    pub fn resolve_access_key_id(&self) -> Option<String> {
        resolve_secret_field(&self.access_key_id, &self.access_key_id_env)
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
    }

    pub fn resolve_secret_access_key(&self) -> Option<String> {
        resolve_secret_field(&self.secret_access_key, &self.secret_access_key_env)
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
    }

    pub fn resolve_session_token(&self) -> Option<String> {
        resolve_secret_field(&self.session_token, &self.session_token_env)
            .or_else(|| std::env::var("AWS_SESSION_TOKEN").ok())
    }
}

/// VAD tuning knobs, see `rusty_claw_media::vad::VadConfig` for defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VadTuning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_start_frames: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_end_frames: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "rusty_claw_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
        }
    }
}

fn default_log_format() -> String {
    "plain".to_string()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// Returns the default config if the file doesn't exist.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::RustyClawError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::RustyClawError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Resolve the default config file path: `~/.rusty_claw/config.json`.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// The voice section, or its defaults if absent.
    pub fn voice(&self) -> VoiceConfig {
        self.voice.clone().unwrap_or_default()
    }
}

/// Base directory for Rusty Claw Voice data: `~/.rusty_claw/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rusty_claw")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_RC_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_RC_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_RC_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_RC_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        let voice = config.voice();
        assert_eq!(voice.model_id(), "amazon.nova-sonic-v1:0");
        assert_eq!(voice.region(), "us-east-1");
        assert_eq!(voice.voice_id(), "matthew");
    }

    #[test]
    fn test_resolve_access_key_id_env_fallback() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_RC_ACCESS_KEY", "AKIATEST") };
        let voice = VoiceConfig {
            access_key_id_env: Some("TEST_RC_ACCESS_KEY".into()),
            ..Default::default()
        };
        assert_eq!(voice.resolve_access_key_id(), Some("AKIATEST".into()));
        unsafe { std::env::remove_var("TEST_RC_ACCESS_KEY") };
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let config = Config::load(Path::new("/nonexistent/rusty-claw-test.json")).unwrap();
        assert!(config.voice.is_none());
    }
}
