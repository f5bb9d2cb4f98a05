//! Process configuration. The only process-wide singletons are
//! configuration and the injected clock — everything else is constructed
//! and wired explicitly, not reached for as a global.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

fn default_port() -> u16 {
    8080
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Fraction of the daily budget at which a warning event is audited.
    #[serde(default = "default_warn_ratio")]
    pub budget_warn_ratio: f64,
    /// Fraction at which approval is required before further spend.
    #[serde(default = "default_approval_ratio")]
    pub budget_approval_ratio: f64,
    /// How long a pending approval lives before auto-expiring.
    #[serde(default = "default_approval_ttl_secs")]
    pub approval_ttl_secs: i64,
}

fn default_warn_ratio() -> f64 {
    0.8
}

fn default_approval_ratio() -> f64 {
    0.95
}

fn default_approval_ttl_secs() -> i64 {
    900
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: BindMode::default(),
            auth: AuthConfig::default(),
            budget_warn_ratio: default_warn_ratio(),
            budget_approval_ratio: default_approval_ratio(),
            approval_ttl_secs: default_approval_ttl_secs(),
        }
    }
}

impl GovernanceConfig {
    /// Read overrides from the environment, falling back to defaults.
    /// Mirrors the `RUSTCLAW_WORKSPACE`-style override pattern: explicit
    /// env vars win, everything else keeps its default.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("AGENTGOV_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(bind) = std::env::var("AGENTGOV_BIND") {
            config.bind = bind.parse().unwrap_or_default();
        }
        if let Ok(token) = std::env::var("AGENTGOV_TOKEN") {
            config.auth = AuthConfig { mode: AuthMode::Token, token: Some(token) };
        }
        if std::env::var("AGENTGOV_NO_AUTH").is_ok() {
            config.auth = AuthConfig { mode: AuthMode::None, token: None };
        }
        config
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &'static str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

impl FromStr for BindMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
            _ => BindMode::Lan,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    None,
}
