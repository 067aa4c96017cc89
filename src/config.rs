use crate::constants::{FTP_PORT, FTP_USER, MIN_NOP_INTERVAL};
use crate::core_error::ConfigError;
use crate::core_reply::patterns::{PatternConfig, ReplyPatterns};
use crate::helpers::default_anon_pass;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use url::Url;

/// Tunables of one FTP session, after per-host overrides were applied.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FtpSettings {
    pub sync_mode: bool,
    pub passive_mode: bool,
    pub timeout: u64, // seconds without progress before reconnecting
    pub redial_interval: u64,
    pub relookup_always: bool,
    pub proxy: String,
    pub nop_interval: u64,
    pub idle: u64, // 0 keeps idle connections forever
    pub max_retries: u32, // 0 = unlimited
    pub skey_allow: bool,
    pub skey_force: bool,
    pub anon_user: String,
    pub anon_pass: Option<String>,
    pub socket_buffer: usize,
    pub socket_maxseg: u32,
    pub verify_address: bool,
    pub verify_port: bool,
    pub limit_rate: u64, // bytes per second, 0 = unlimited
    pub limit_max: u64,
}

impl Default for FtpSettings {
    fn default() -> Self {
        Self {
            sync_mode: true,
            passive_mode: false,
            timeout: 600,
            redial_interval: 30,
            relookup_always: false,
            proxy: String::new(),
            nop_interval: 120,
            idle: 180,
            max_retries: 0,
            skey_allow: true,
            skey_force: false,
            anon_user: String::from(FTP_USER),
            anon_pass: None,
            socket_buffer: 0,
            socket_maxseg: 0,
            verify_address: false,
            verify_port: false,
            limit_rate: 0,
            limit_max: 0,
        }
    }
}

impl FtpSettings {
    /// Anonymous password, falling back to `-<login>@`.
    pub fn anon_pass(&self) -> String {
        self.anon_pass.clone().unwrap_or_else(default_anon_pass)
    }

    fn apply(&mut self, o: &HostOverride) {
        if let Some(v) = o.sync_mode {
            self.sync_mode = v;
        }
        if let Some(v) = o.passive_mode {
            self.passive_mode = v;
        }
        if let Some(v) = o.timeout {
            self.timeout = v;
        }
        if let Some(v) = o.redial_interval {
            self.redial_interval = v;
        }
        if let Some(v) = o.relookup_always {
            self.relookup_always = v;
        }
        if let Some(v) = &o.proxy {
            self.proxy = v.clone();
        }
        if let Some(v) = o.nop_interval {
            self.nop_interval = v;
        }
        if let Some(v) = o.idle {
            self.idle = v;
        }
        if let Some(v) = o.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = o.skey_allow {
            self.skey_allow = v;
        }
        if let Some(v) = o.skey_force {
            self.skey_force = v;
        }
        if let Some(v) = &o.anon_user {
            self.anon_user = v.clone();
        }
        if let Some(v) = &o.anon_pass {
            self.anon_pass = Some(v.clone());
        }
        if let Some(v) = o.socket_buffer {
            self.socket_buffer = v;
        }
        if let Some(v) = o.socket_maxseg {
            self.socket_maxseg = v;
        }
        if let Some(v) = o.verify_address {
            self.verify_address = v;
        }
        if let Some(v) = o.verify_port {
            self.verify_port = v;
        }
        if let Some(v) = o.limit_rate {
            self.limit_rate = v;
        }
        if let Some(v) = o.limit_max {
            self.limit_max = v;
        }
    }
}

/// Per-host values; anything left out keeps the `[ftp]` default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HostOverride {
    pub sync_mode: Option<bool>,
    pub passive_mode: Option<bool>,
    pub timeout: Option<u64>,
    pub redial_interval: Option<u64>,
    pub relookup_always: Option<bool>,
    pub proxy: Option<String>,
    pub nop_interval: Option<u64>,
    pub idle: Option<u64>,
    pub max_retries: Option<u32>,
    pub skey_allow: Option<bool>,
    pub skey_force: Option<bool>,
    pub anon_user: Option<String>,
    pub anon_pass: Option<String>,
    pub socket_buffer: Option<usize>,
    pub socket_maxseg: Option<u32>,
    pub verify_address: Option<bool>,
    pub verify_port: Option<bool>,
    pub limit_rate: Option<u64>,
    pub limit_max: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ftp: FtpSettings,
    #[serde(default)]
    pub hosts: HashMap<String, HostOverride>,
    #[serde(default)]
    pub patterns: PatternConfig,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Settings in effect for `host` (`None` before a host is known).
    pub fn settings_for(&self, host: Option<&str>) -> FtpSettings {
        let mut settings = self.ftp.clone();
        if let Some(o) = host.and_then(|h| self.hosts.get(h)) {
            settings.apply(o);
        }
        if settings.nop_interval < MIN_NOP_INTERVAL {
            settings.nop_interval = MIN_NOP_INTERVAL;
        }
        settings
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_proxy(&self.ftp.proxy)?;
        for o in self.hosts.values() {
            if let Some(p) = &o.proxy {
                parse_proxy(p)?;
            }
        }
        self.reply_patterns()?;
        Ok(())
    }

    pub fn reply_patterns(&self) -> Result<ReplyPatterns, ConfigError> {
        ReplyPatterns::compile(&self.patterns)
    }
}

/// Where the control connection really goes when a proxy is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// Parses `ftp://[user[:pass]@]host[:port]` or a bare `host[:port]`.
///
/// An empty string or a URL without a host means "no proxy".
pub fn parse_proxy(spec: &str) -> Result<Option<ProxySpec>, ConfigError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(None);
    }
    let full = if spec.contains("://") {
        spec.to_string()
    } else {
        format!("ftp://{}", spec)
    };
    let url = Url::parse(&full)
        .map_err(|e| ConfigError::InvalidProxy(spec.to_string(), e.to_string()))?;
    if url.scheme() != "ftp" {
        return Err(ConfigError::UnsupportedProxy(url.scheme().to_string()));
    }
    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => return Ok(None),
    };
    let user = Some(url.username())
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    Ok(Some(ProxySpec {
        host,
        port: url.port_or_known_default().unwrap_or(FTP_PORT),
        user,
        pass: url.password().map(str::to_string),
    }))
}
