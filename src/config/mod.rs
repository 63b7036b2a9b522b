//! Configuration module for the interview engine
//!
//! This module handles engine configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use interview_voice_engine::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = EngineConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Relay: {}", config.connection.relay_url);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{PipelineConfig, QueueConfig, SchedulerConfig};
use crate::core::connection::{DEFAULT_AUDIO_CHANNEL_CAPACITY, ReconnectionConfig};
use crate::core::conversation::MachineConfig;
use crate::core::router::RouterConfig;

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8787/interview";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Relay transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the relay (ws:// or wss://)
    pub relay_url: String,
    pub reconnection: ReconnectionConfig,
    /// Outbound audio frames buffered before new ones are dropped
    pub audio_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            reconnection: ReconnectionConfig::default(),
            audio_channel_capacity: DEFAULT_AUDIO_CHANNEL_CAPACITY,
        }
    }
}

/// Microphone encoding settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Wire sample rate offered to the relay (8000-48000 Hz)
    pub target_sample_rate: u32,
    /// Wire chunk length in milliseconds
    pub chunk_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            chunk_ms: 20,
        }
    }
}

/// Playback timing, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Lead before the first agent chunk of a session
    pub initial_lead_ms: u64,
    /// How far the timeline may trail the clock before it is reset
    pub drift_threshold_ms: u64,
    /// Lead applied after a drift reset
    pub lead_time_ms: u64,
    /// Audio committed to the output ahead of the clock
    pub max_schedule_ahead_ms: u64,
    /// Engine pump tick
    pub pump_interval_ms: u64,
    /// Silence after the last chunk before a drained queue ends the agent turn
    pub drain_grace_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_lead_ms: 100,
            drift_threshold_ms: 100,
            lead_time_ms: 5,
            max_schedule_ahead_ms: 300,
            pump_interval_ms: 10,
            drain_grace_ms: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Safety valve for an agent turn that never completes
    pub agent_speaking_timeout_secs: f64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            agent_speaking_timeout_secs: 30.0,
        }
    }
}

/// Where agent audio and reports go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output device sample rate
    pub sample_rate: u32,
    /// Directory for JSON session reports
    pub report_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            report_dir: PathBuf::from("reports"),
        }
    }
}

/// Engine configuration
///
/// Contains everything needed to run an interview session:
/// - Relay connection and retry policy
/// - Microphone encoding
/// - Jitter buffer limits and playback timing
/// - Turn-taking safety valve
/// - Provider routing
/// - Output device and report location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
    pub queue: QueueConfig,
    pub playback: PlaybackConfig,
    pub conversation: ConversationConfig,
    pub router: RouterConfig,
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables over defaults
    ///
    /// The .env file is loaded in main.rs at startup, so its values are seen
    /// here as ordinary environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// The merged configuration is validated before it is returned.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        env::apply_env(&mut config)?;
        yaml_config.apply(&mut config);

        validation::validate(&config)?;
        Ok(config)
    }

    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        validation::validate(self)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            initial_lead: self.playback.initial_lead_ms as f64 / 1000.0,
            drift_threshold: self.playback.drift_threshold_ms as f64 / 1000.0,
            lead_time: self.playback.lead_time_ms as f64 / 1000.0,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            queue: self.queue.clone(),
            scheduler: self.scheduler_config(),
            max_schedule_ahead: self.playback.max_schedule_ahead_ms as f64 / 1000.0,
        }
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            agent_speaking_timeout: self.conversation.agent_speaking_timeout_secs,
        }
    }
}
