use crate::core_error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Reply texts some servers are known to send. They are not protocol, so
// they can be overridden per installation.
const LOGIN_INCORRECT: &str = "Login incorrect";
const UNKNOWN_USER: &str = "unknown";
const MICROSOFT_BANNER: &str = "Microsoft FTP Service";
const BROKEN_PIPE: &str = "Broken pipe";
const PROXY_LOOKUP: &str = "host|resolve";
const REMOTE_TIMEOUT: &str = "Timeout";

/// `[patterns]` table; a missing entry keeps the built-in text.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PatternConfig {
    pub login_incorrect: Option<String>,
    pub unknown_user: Option<String>,
    pub microsoft_banner: Option<String>,
    pub broken_pipe: Option<String>,
    pub proxy_lookup: Option<String>,
    pub remote_timeout: Option<String>,
}

/// Compiled reply heuristics.
#[derive(Debug, Clone)]
pub struct ReplyPatterns {
    pub login_incorrect: Regex,
    pub unknown_user: Regex,
    pub microsoft_banner: Regex,
    pub broken_pipe: Regex,
    pub proxy_lookup: Regex,
    pub remote_timeout: Regex,
}

impl ReplyPatterns {
    pub fn compile(cfg: &PatternConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            login_incorrect: build(
                "login_incorrect",
                cfg.login_incorrect.as_deref(),
                &regex::escape(LOGIN_INCORRECT),
            )?,
            unknown_user: build(
                "unknown_user",
                cfg.unknown_user.as_deref(),
                &regex::escape(UNKNOWN_USER),
            )?,
            microsoft_banner: build(
                "microsoft_banner",
                cfg.microsoft_banner.as_deref(),
                &regex::escape(MICROSOFT_BANNER),
            )?,
            broken_pipe: build(
                "broken_pipe",
                cfg.broken_pipe.as_deref(),
                &regex::escape(BROKEN_PIPE),
            )?,
            proxy_lookup: build("proxy_lookup", cfg.proxy_lookup.as_deref(), PROXY_LOOKUP)?,
            remote_timeout: build(
                "remote_timeout",
                cfg.remote_timeout.as_deref(),
                &regex::escape(REMOTE_TIMEOUT),
            )?,
        })
    }
}

fn build(name: &'static str, custom: Option<&str>, default: &str) -> Result<Regex, ConfigError> {
    Regex::new(custom.unwrap_or(default)).map_err(|source| ConfigError::InvalidPattern { name, source })
}
