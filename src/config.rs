//! Process configuration, read from the environment at startup
//!
//! Every value goes through a [`Lookup`] so tests can supply their own
//! key/value source instead of mutating the process environment.

use crate::llm::{LlmConfig, LlmError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Key/value source for configuration
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),
    #[error("Failed to initialize provider: {0}")]
    Provider(#[from] LlmError),
}

/// Parse `key` if present, otherwise return `default`
pub fn parse_or<T: FromStr>(
    lookup: &Lookup<'_>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

fn parse_bool(lookup: &Lookup<'_>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
    }
}

/// What happens to the user turn when the provider call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Keep the user turn; trimming and idle reset age it out
    #[default]
    Retain,
    /// Remove the user turn this attempt appended
    Discard,
}

impl FromStr for FailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" | "keep" => Ok(FailurePolicy::Retain),
            "discard" | "drop" => Ok(FailurePolicy::Discard),
            _ => Err(()),
        }
    }
}

/// Tunables for the orchestration engine
#[derive(Debug, Clone)]
pub struct Settings {
    /// Generation length hint sent with every request
    pub max_tokens: u32,
    /// Retained user/assistant pairs, at least 1
    pub max_context: usize,
    pub reset_idle: Duration,
    pub debounce: Duration,
    pub sweep_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// Append provider error detail to fallback replies
    pub verbose_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            max_context: 8,
            reset_idle: Duration::from_secs(600),
            debounce: Duration::from_millis(250),
            sweep_interval: Duration::from_secs(5),
            failure_policy: FailurePolicy::Retain,
            verbose_errors: false,
        }
    }
}

impl Settings {
    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let max_tokens: u32 = parse_or(lookup, "MAX_TOKENS", defaults.max_tokens)?;
        let mut max_context: usize = parse_or(lookup, "MAX_CONTEXT", defaults.max_context)?;
        if max_context < 1 {
            tracing::warn!(requested = max_context, "MAX_CONTEXT below 1, using 1");
            max_context = 1;
        }

        let mut reset_idle_secs: u64 =
            parse_or(lookup, "RESET_IDLE_SECONDS", defaults.reset_idle.as_secs())?;
        if reset_idle_secs < 1 {
            tracing::warn!(requested = reset_idle_secs, "RESET_IDLE_SECONDS must be positive, using 1");
            reset_idle_secs = 1;
        }

        let debounce_ms: u64 = parse_or(lookup, "DEBOUNCE_MS", 250)?;

        let mut sweep_secs: u64 =
            parse_or(lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;
        if sweep_secs < 1 {
            tracing::warn!(requested = sweep_secs, "SWEEP_INTERVAL_SECS must be positive, using 1");
            sweep_secs = 1;
        }

        let failure_policy: FailurePolicy = match lookup("HISTORY_ON_FAILURE") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.parse().map_err(|()| ConfigError::Invalid {
                    key: "HISTORY_ON_FAILURE",
                    value: raw,
                })?
            }
            _ => FailurePolicy::default(),
        };

        Ok(Self {
            max_tokens,
            max_context,
            reset_idle: Duration::from_secs(reset_idle_secs),
            debounce: Duration::from_millis(debounce_ms),
            sweep_interval: Duration::from_secs(sweep_secs),
            failure_policy,
            verbose_errors: parse_bool(lookup, "VERBOSE_ERRORS")?,
        })
    }
}

/// Everything the process needs to start
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Directory holding one subdirectory of channel files per persona
    pub root: PathBuf,
    pub llm: LlmConfig,
    pub settings: Settings,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let root = lookup("PERSONA_RELAY_ROOT")
            .filter(|r| !r.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("PERSONA_RELAY_ROOT"))?;

        Ok(Self {
            root,
            llm: LlmConfig::from_lookup(lookup)?,
            settings: Settings::from_lookup(lookup)?,
        })
    }
}
