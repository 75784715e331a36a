//! Configuration types for windows and their peer sessions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every session an endpoint opens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowRtcConfig {
    /// STUN server URLs (stun: or stuns:), may be empty for same-host peers
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Deadline for request/response invocations to the hub, in milliseconds
    /// (default: 5000, range: 1-60000)
    pub invoke_timeout_ms: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for WindowRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            invoke_timeout_ms: 5000,
        }
    }
}

impl WindowRtcConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
            if turn.username.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires a username",
                    turn.url
                )));
            }
        }

        if self.invoke_timeout_ms == 0 || self.invoke_timeout_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "invoke_timeout_ms must be in range 1-60000, got {}",
                self.invoke_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    /// Parse TURN servers given as `turn:host:port:username:credential`
    pub fn parse_turn_server(spec: &str) -> crate::Result<TurnServerConfig> {
        let mut parts = spec.rsplitn(3, ':');
        let (credential, username, url) = match (parts.next(), parts.next(), parts.next()) {
            (Some(credential), Some(username), Some(url)) => (credential, username, url),
            _ => {
                return Err(crate::Error::InvalidConfig(format!(
                    "TURN server must be turn:host:port:username:credential, got {}",
                    spec
                )))
            }
        };
        Ok(TurnServerConfig {
            url: url.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        })
    }
}
