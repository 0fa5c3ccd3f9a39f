//! Environment-backed runtime configuration for `chat-smoke`.

use std::{env, error::Error, fmt};

use chat_core::{EngineConfig, MAX_MESSAGE_BODY_CHARS};

const DEFAULT_GROUP_ID: &str = "smoke-group";
const DEFAULT_VIEWER_ID: &str = "smoke-viewer";
const DEFAULT_VIEWER_NAME: &str = "Smoke Viewer";

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Group conversation to subscribe to.
    pub group_id: String,
    /// Viewer identity used for `is_own_message` computation.
    pub viewer_id: String,
    /// Viewer display name used when sending.
    pub viewer_name: String,
    /// Engine tuning forwarded to `ChatSyncEngine::new`.
    pub engine: EngineConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let group_id = optional_trimmed_env("HUDDLE_GROUP_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_GROUP_ID.to_owned());
        let viewer_id = optional_trimmed_env("HUDDLE_VIEWER_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_VIEWER_ID.to_owned());
        let viewer_name = optional_trimmed_env("HUDDLE_VIEWER_NAME", &mut lookup)
            .unwrap_or_else(|| DEFAULT_VIEWER_NAME.to_owned());

        let mut engine = EngineConfig::default();
        if let Some(raw) = optional_trimmed_env("HUDDLE_EVENT_BUFFER", &mut lookup) {
            let event_buffer = raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "HUDDLE_EVENT_BUFFER",
                value: raw.clone(),
                reason: "must be a positive integer".to_owned(),
            })?;
            if event_buffer == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "HUDDLE_EVENT_BUFFER",
                    value: raw,
                    reason: "must be at least 1".to_owned(),
                });
            }
            engine.event_buffer = event_buffer;
        }
        if let Some(raw) = optional_trimmed_env("HUDDLE_MAX_BODY_CHARS", &mut lookup) {
            let max_body_chars = raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "HUDDLE_MAX_BODY_CHARS",
                value: raw.clone(),
                reason: "must be a positive integer".to_owned(),
            })?;
            if max_body_chars == 0 || max_body_chars > MAX_MESSAGE_BODY_CHARS {
                return Err(ConfigError::InvalidValue {
                    key: "HUDDLE_MAX_BODY_CHARS",
                    value: raw,
                    reason: format!("must be between 1 and {MAX_MESSAGE_BODY_CHARS}"),
                });
            }
            engine.max_body_chars = max_body_chars;
        }

        Ok(Self {
            group_id,
            viewer_id,
            viewer_name,
            engine,
        })
    }
}

fn optional_trimmed_env<F>(key: &str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Configuration parsing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Offending raw value.
        value: String,
        /// Parse failure description.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "invalid value '{value}' for {key}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}
