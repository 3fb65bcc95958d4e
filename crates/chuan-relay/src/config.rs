//! Server configuration
//!
//! Sources, in precedence order: command-line flags, environment
//! variables, the `.chuan.env` dotfile, built-in defaults. The dotfile
//! is loaded into the environment first without overriding variables
//! that are already set, and clap resolves flags over env, so the
//! chain falls out of the two layers.

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Dotfile read from the working directory at startup.
pub const DOTFILE: &str = ".chuan.env";

/// Fully-resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub port: u16,
    /// External static root; unset or unusable falls back to the
    /// embedded page
    pub frontend_dir: Option<PathBuf>,
    pub turn: TurnSettings,
}

/// Embedded TURN relay settings.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub enabled: bool,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub realm: String,
    /// External-facing relay address published to clients
    pub public_ip: IpAddr,
}

impl ServerConfig {
    /// Resolve everything but the HTTP port (which clap owns) from the
    /// environment.
    pub fn from_env(port: u16) -> Self {
        let mut config = ServerConfig {
            port,
            frontend_dir: env::var("FRONTEND_DIR").ok().map(PathBuf::from),
            turn: TurnSettings {
                enabled: env_parse("TURN_ENABLED", false),
                port: env_parse("TURN_PORT", 3478),
                username: env_or("TURN_USERNAME", "chuan"),
                password: env_or("TURN_PASSWORD", "chuan123"),
                realm: env_or("TURN_REALM", "localhost"),
                public_ip: env_parse("TURN_PUBLIC_IP", IpAddr::V4(Ipv4Addr::LOCALHOST)),
            },
        };
        config.validate();
        config
    }

    /// Clamp inconsistent values instead of refusing to start.
    pub fn validate(&mut self) {
        if self.turn.enabled
            && (self.turn.username.is_empty() || self.turn.password.is_empty())
        {
            warn!("TURN enabled without credentials, disabling");
            self.turn.enabled = false;
        }
    }
}

/// String variable with a default.
fn env_or(key: &str, default: &str) -> String {
    value_or(env::var(key).ok(), default)
}

/// Parsed variable with a default.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    value_parse(key, env::var(key).ok(), default)
}

fn value_or(raw: Option<String>, default: &str) -> String {
    raw.unwrap_or_else(|| default.to_string())
}

/// A malformed value warns and falls back rather than aborting
/// startup; `key` only labels the warning.
fn value_parse<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => match parse_value(&raw) {
            Some(value) => value,
            None => {
                warn!(key, raw = %raw, "unparseable configuration value, using default");
                default
            }
        },
        None => default,
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_or_prefers_present_values() {
        assert_eq!(value_or(Some("custom".to_string()), "default"), "custom");
        assert_eq!(value_or(None, "default"), "default");
    }

    #[test]
    fn value_parse_falls_back_on_garbage() {
        assert_eq!(
            value_parse("TURN_PORT", Some("not-a-number".to_string()), 3478u16),
            3478
        );
        assert_eq!(
            value_parse("TURN_PORT", Some("5349".to_string()), 3478u16),
            5349
        );
        assert_eq!(value_parse("TURN_PORT", None, 3478u16), 3478);
    }

    #[test]
    fn bool_values_parse() {
        assert_eq!(parse_value::<bool>("true"), Some(true));
        assert_eq!(parse_value::<bool>("false"), Some(false));
        assert_eq!(parse_value::<bool>(" true "), Some(true));
        assert_eq!(parse_value::<bool>("yes"), None);
    }

    #[test]
    fn validate_disables_turn_without_credentials() {
        let mut config = ServerConfig {
            port: 8080,
            frontend_dir: None,
            turn: TurnSettings {
                enabled: true,
                port: 3478,
                username: String::new(),
                password: "chuan123".to_string(),
                realm: "localhost".to_string(),
                public_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
        };
        config.validate();
        assert!(!config.turn.enabled);
    }
}
