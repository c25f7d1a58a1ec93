//! Environment-backed runtime configuration for `sync-smoke`.

use std::{env, error::Error, fmt};

use sync_core::EngineConfig;

const DEFAULT_LOCAL_USER: &str = "@me";
const DEFAULT_CONVERSATION: &str = "general";
const DEFAULT_SEED_MESSAGES: usize = 75;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// User the session acts as.
    pub local_user_id: String,
    /// Conversation seeded and selected on startup.
    pub conversation_id: String,
    /// History messages seeded into the in-memory server.
    pub seed_messages: usize,
    /// Engine tuning forwarded to `ChatSession::new`.
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
        let local_user_id = optional_trimmed_env("CHAT_SYNC_LOCAL_USER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_LOCAL_USER.to_owned());
        let conversation_id = optional_trimmed_env("CHAT_SYNC_CONVERSATION", &mut lookup)
            .unwrap_or_else(|| DEFAULT_CONVERSATION.to_owned());

        let defaults = EngineConfig::default();
        let page_size = parse_optional_u16("CHAT_SYNC_PAGE_SIZE", &mut lookup)?
            .unwrap_or(defaults.page_size);
        let page_size_cap = parse_optional_u16("CHAT_SYNC_PAGE_SIZE_CAP", &mut lookup)?
            .unwrap_or(defaults.page_size_cap);
        let seed_messages = parse_optional_usize(
            "CHAT_SYNC_SEED_MESSAGES",
            DEFAULT_SEED_MESSAGES,
            &mut lookup,
        )?;

        if page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_SYNC_PAGE_SIZE",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if page_size_cap == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_SYNC_PAGE_SIZE_CAP",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            local_user_id,
            conversation_id,
            seed_messages,
            engine: EngineConfig {
                page_size,
                page_size_cap,
            },
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_from_pairs(&[]).expect("empty environment should parse");
        assert_eq!(cfg.local_user_id, DEFAULT_LOCAL_USER);
        assert_eq!(cfg.conversation_id, DEFAULT_CONVERSATION);
        assert_eq!(cfg.seed_messages, DEFAULT_SEED_MESSAGES);
        assert_eq!(cfg.engine, EngineConfig::default());
    }

    #[test]
    fn parses_overrides_and_trims_whitespace() {
        let cfg = config_from_pairs(&[
            ("CHAT_SYNC_LOCAL_USER", "  @alice "),
            ("CHAT_SYNC_CONVERSATION", "design"),
            ("CHAT_SYNC_PAGE_SIZE", "20"),
            ("CHAT_SYNC_PAGE_SIZE_CAP", "50"),
            ("CHAT_SYNC_SEED_MESSAGES", " 10 "),
        ])
        .expect("config should parse");

        assert_eq!(cfg.local_user_id, "@alice");
        assert_eq!(cfg.conversation_id, "design");
        assert_eq!(cfg.seed_messages, 10);
        assert_eq!(cfg.engine.page_size, 20);
        assert_eq!(cfg.engine.page_size_cap, 50);
    }

    #[test]
    fn blank_strings_fall_back_to_defaults() {
        let cfg = config_from_pairs(&[("CHAT_SYNC_LOCAL_USER", "   "), ("CHAT_SYNC_PAGE_SIZE", "")])
            .expect("blank values should parse");
        assert_eq!(cfg.local_user_id, DEFAULT_LOCAL_USER);
        assert_eq!(cfg.engine.page_size, EngineConfig::default().page_size);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("CHAT_SYNC_PAGE_SIZE", "abc")])
            .expect_err("invalid page size should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_SYNC_PAGE_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_page_size() {
        let err = config_from_pairs(&[("CHAT_SYNC_PAGE_SIZE", "0")])
            .expect_err("zero page size should fail");
        assert_eq!(err.to_string(), "invalid CHAT_SYNC_PAGE_SIZE='0': must be at least 1");
    }
}
