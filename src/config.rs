//! Engine options and environment overrides.

use std::env;
use std::time::Duration;

use gemini_api::{BrowserIdentity, Endpoints, TransportConfig};
use thiserror::Error;

use crate::model::ModelDescriptor;

pub const DEFAULT_SOURCE_HINT: &str = "auto";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("{key} must be a whole number of seconds, got '{value}'")]
    InvalidSeconds { key: &'static str, value: String },
}

/// Per-call deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub chat: Duration,
    pub upload: Duration,
    pub bootstrap: Duration,
    pub refresh: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            chat: Duration::from_secs(60),
            upload: Duration::from_secs(120),
            bootstrap: Duration::from_secs(30),
            refresh: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: ModelDescriptor,
    /// Run the background rotation task.
    pub auto_refresh_rotation: bool,
    /// Ask the external cookie source for fresh cookies on auth failure.
    pub external_refresh: bool,
    pub external_source_hint: String,
    pub timeouts: Timeouts,
    pub rotation_interval: Duration,
    /// Lower bound between two successful rotations.
    pub rotation_min_gap: Duration,
    /// Lower bound between two external refresh attempts.
    pub refresh_min_gap: Duration,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelDescriptor::unspecified(),
            auto_refresh_rotation: true,
            external_refresh: false,
            external_source_hint: DEFAULT_SOURCE_HINT.to_owned(),
            timeouts: Timeouts::default(),
            rotation_interval: Duration::from_secs(600),
            rotation_min_gap: Duration::from_secs(300),
            refresh_min_gap: Duration::from_secs(60),
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_model(mut self, model: ModelDescriptor) -> Self {
        self.model = model;
        self
    }

    pub fn with_auto_refresh_rotation(mut self, enabled: bool) -> Self {
        self.auto_refresh_rotation = enabled;
        self
    }

    pub fn with_external_refresh(mut self, enabled: bool) -> Self {
        self.external_refresh = enabled;
        self
    }

    pub fn with_external_source_hint(mut self, hint: impl Into<String>) -> Self {
        self.external_source_hint = hint.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    pub fn with_rotation_min_gap(mut self, gap: Duration) -> Self {
        self.rotation_min_gap = gap;
        self
    }

    pub fn with_refresh_min_gap(mut self, gap: Duration) -> Self {
        self.refresh_min_gap = gap;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.transport.endpoints = endpoints;
        self
    }

    pub fn with_browser(mut self, browser: BrowserIdentity) -> Self {
        self.transport.browser = browser;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Apply environment overrides on top of the current values.
    pub fn with_env(mut self, env: &EnvConfig) -> Result<Self, ConfigError> {
        if let Some(name) = &env.model {
            self.model = ModelDescriptor::from_name(name)
                .ok_or_else(|| ConfigError::UnknownModel(name.clone()))?;
        }
        if let Some(enabled) = env.auto_rotate {
            self.auto_refresh_rotation = enabled;
        }
        if let Some(enabled) = env.external_refresh {
            self.external_refresh = enabled;
        }
        if let Some(hint) = &env.cookie_source {
            self.external_source_hint = hint.clone();
        }
        if let Some(raw) = &env.chat_timeout_secs {
            self.timeouts.chat = parse_seconds(ENV_CHAT_TIMEOUT, raw)?;
        }
        if let Some(raw) = &env.upload_timeout_secs {
            self.timeouts.upload = parse_seconds(ENV_UPLOAD_TIMEOUT, raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("timeouts.chat", self.timeouts.chat),
            ("timeouts.upload", self.timeouts.upload),
            ("timeouts.bootstrap", self.timeouts.bootstrap),
            ("timeouts.refresh", self.timeouts.refresh),
            ("rotation_interval", self.rotation_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name });
            }
        }
        Ok(())
    }
}

pub const ENV_MODEL: &str = "GEMINI_WEB_MODEL";
pub const ENV_AUTO_ROTATE: &str = "GEMINI_WEB_AUTO_ROTATE";
pub const ENV_EXTERNAL_REFRESH: &str = "GEMINI_WEB_EXTERNAL_REFRESH";
pub const ENV_COOKIE_SOURCE: &str = "GEMINI_WEB_COOKIE_SOURCE";
pub const ENV_CHAT_TIMEOUT: &str = "GEMINI_WEB_CHAT_TIMEOUT_SECS";
pub const ENV_UPLOAD_TIMEOUT: &str = "GEMINI_WEB_UPLOAD_TIMEOUT_SECS";

/// Raw environment overrides; unset or blank variables are `None`.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub model: Option<String>,
    pub auto_rotate: Option<bool>,
    pub external_refresh: Option<bool>,
    pub cookie_source: Option<String>,
    pub chat_timeout_secs: Option<String>,
    pub upload_timeout_secs: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            model: env_string_opt(ENV_MODEL),
            auto_rotate: env_string_opt(ENV_AUTO_ROTATE).map(|value| value != "0"),
            external_refresh: env_string_opt(ENV_EXTERNAL_REFRESH).map(|value| value == "1"),
            cookie_source: env_string_opt(ENV_COOKIE_SOURCE),
            chat_timeout_secs: env_string_opt(ENV_CHAT_TIMEOUT),
            upload_timeout_secs: env_string_opt(ENV_UPLOAD_TIMEOUT),
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_owned())
        }
    })
}

fn parse_seconds(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidSeconds {
            key,
            value: raw.to_owned(),
        })
}
