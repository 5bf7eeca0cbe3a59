use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BedlamError, Result};
use crate::services::filter::DEFAULT_PROCESSED_CAPACITY;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Reject bodies that do not decode as a known envelope instead of forwarding them.
    #[serde(default)]
    pub strict_validation: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_alive_seconds: default_keep_alive_seconds(),
            channel_capacity: default_channel_capacity(),
            strict_validation: false,
        }
    }
}

impl RelayConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParticipantConfig {
    pub endpoint_url: Option<String>,
    pub local_participant_id: Option<String>,
    #[serde(default = "default_processed_capacity")]
    pub processed_capacity: usize,
    #[serde(default = "default_server_timeout_seconds")]
    pub server_timeout_seconds: u64,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    pub dispatch_timeout_ms: Option<u64>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            local_participant_id: None,
            processed_capacity: default_processed_capacity(),
            server_timeout_seconds: default_server_timeout_seconds(),
            auto_reconnect: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            dispatch_timeout_ms: None,
        }
    }
}

impl ParticipantConfig {
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_seconds.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub relay: Option<RelayConfig>,
    pub participant: Option<ParticipantConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| BedlamError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| BedlamError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn relay_or_default(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn participant_or_default(&self) -> ParticipantConfig {
        self.participant.clone().unwrap_or_default()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7071
}

fn default_keep_alive_seconds() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    256
}

fn default_processed_capacity() -> usize {
    DEFAULT_PROCESSED_CAPACITY
}

fn default_server_timeout_seconds() -> u64 {
    15 * 60
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}
