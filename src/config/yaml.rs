use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult, EngineConfig};
use crate::core::router::ProviderKind;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// connection:
///   relay_url: "wss://relay.example.com/interview"
///   audio_channel_capacity: 256
///   reconnection:
///     max_attempts: 3
///     initial_delay_ms: 500
///     max_delay_ms: 8000
///     backoff_multiplier: 2.0
///     jitter: false
///     connect_timeout_ms: 10000
///
/// audio:
///   target_sample_rate: 16000
///   chunk_ms: 20
///
/// queue:
///   max_queue: 50
///   trim_target: 30
///   warn_threshold: 30
///
/// playback:
///   initial_lead_ms: 100
///   drift_threshold_ms: 100
///   lead_time_ms: 5
///   max_schedule_ahead_ms: 300
///   pump_interval_ms: 10
///   drain_grace_ms: 400
///
/// conversation:
///   agent_speaking_timeout_secs: 30
///
/// router:
///   provider: relay
///   non_fatal_error_codes: ["rate_limited"]
///
/// output:
///   sample_rate: 24000
///   report_dir: "./reports"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub connection: Option<ConnectionYaml>,
    pub audio: Option<AudioYaml>,
    pub queue: Option<QueueYaml>,
    pub playback: Option<PlaybackYaml>,
    pub conversation: Option<ConversationYaml>,
    pub router: Option<RouterYaml>,
    pub output: Option<OutputYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub relay_url: Option<String>,
    pub audio_channel_capacity: Option<usize>,
    pub reconnection: Option<ReconnectionYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectionYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
    pub jitter: Option<bool>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub target_sample_rate: Option<u32>,
    pub chunk_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueueYaml {
    pub max_queue: Option<usize>,
    pub trim_target: Option<usize>,
    pub warn_threshold: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub initial_lead_ms: Option<u64>,
    pub drift_threshold_ms: Option<u64>,
    pub lead_time_ms: Option<u64>,
    pub max_schedule_ahead_ms: Option<u64>,
    pub pump_interval_ms: Option<u64>,
    pub drain_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConversationYaml {
    pub agent_speaking_timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RouterYaml {
    pub provider: Option<ProviderKind>,
    pub non_fatal_error_codes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OutputYaml {
    pub sample_rate: Option<u32>,
    pub report_dir: Option<String>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Override `config` with every value present in the file.
    pub fn apply(self, config: &mut EngineConfig) {
        if let Some(connection) = self.connection {
            set(&mut config.connection.relay_url, connection.relay_url);
            set(
                &mut config.connection.audio_channel_capacity,
                connection.audio_channel_capacity,
            );
            if let Some(r) = connection.reconnection {
                let target = &mut config.connection.reconnection;
                set(&mut target.enabled, r.enabled);
                set(&mut target.max_attempts, r.max_attempts);
                set(&mut target.initial_delay_ms, r.initial_delay_ms);
                set(&mut target.max_delay_ms, r.max_delay_ms);
                set(&mut target.backoff_multiplier, r.backoff_multiplier);
                set(&mut target.jitter, r.jitter);
                set(&mut target.connect_timeout_ms, r.connect_timeout_ms);
            }
        }

        if let Some(audio) = self.audio {
            set(&mut config.audio.target_sample_rate, audio.target_sample_rate);
            set(&mut config.audio.chunk_ms, audio.chunk_ms);
        }

        if let Some(queue) = self.queue {
            set(&mut config.queue.max_queue, queue.max_queue);
            set(&mut config.queue.trim_target, queue.trim_target);
            set(&mut config.queue.warn_threshold, queue.warn_threshold);
        }

        if let Some(p) = self.playback {
            let target = &mut config.playback;
            set(&mut target.initial_lead_ms, p.initial_lead_ms);
            set(&mut target.drift_threshold_ms, p.drift_threshold_ms);
            set(&mut target.lead_time_ms, p.lead_time_ms);
            set(&mut target.max_schedule_ahead_ms, p.max_schedule_ahead_ms);
            set(&mut target.pump_interval_ms, p.pump_interval_ms);
            set(&mut target.drain_grace_ms, p.drain_grace_ms);
        }

        if let Some(conversation) = self.conversation {
            set(
                &mut config.conversation.agent_speaking_timeout_secs,
                conversation.agent_speaking_timeout_secs,
            );
        }

        if let Some(router) = self.router {
            set(&mut config.router.provider, router.provider);
            set(
                &mut config.router.non_fatal_error_codes,
                router.non_fatal_error_codes,
            );
        }

        if let Some(output) = self.output {
            set(&mut config.output.sample_rate, output.sample_rate);
            set(
                &mut config.output.report_dir,
                output.report_dir.map(PathBuf::from),
            );
        }
    }
}
