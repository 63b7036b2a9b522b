//! Configuration validation logic.

use super::{ConfigError, ConfigResult, EngineConfig};
use crate::core::audio::validate_sample_rate;
use crate::utils::url_validation::validate_relay_url;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

pub(crate) fn validate(config: &EngineConfig) -> ConfigResult<()> {
    validate_relay_url(&config.connection.relay_url)
        .map_err(|e| invalid(format!("connection.relay_url: {e}")))?;

    if config.connection.audio_channel_capacity == 0 {
        return Err(invalid("connection.audio_channel_capacity must be positive"));
    }

    let reconnection = &config.connection.reconnection;
    if reconnection.initial_delay_ms == 0 {
        return Err(invalid("reconnection.initial_delay_ms must be positive"));
    }
    if reconnection.backoff_multiplier < 1.0 {
        return Err(invalid("reconnection.backoff_multiplier must be at least 1.0"));
    }
    if reconnection.max_delay_ms < reconnection.initial_delay_ms {
        return Err(invalid(
            "reconnection.max_delay_ms must not be below initial_delay_ms",
        ));
    }
    if reconnection.connect_timeout_ms == 0 {
        return Err(invalid("reconnection.connect_timeout_ms must be positive"));
    }

    validate_sample_rate(config.audio.target_sample_rate)
        .map_err(|e| invalid(format!("audio.target_sample_rate: {e}")))?;
    validate_sample_rate(config.output.sample_rate)
        .map_err(|e| invalid(format!("output.sample_rate: {e}")))?;
    if config.audio.chunk_ms == 0 || config.audio.chunk_ms > 1000 {
        return Err(invalid("audio.chunk_ms must be between 1 and 1000"));
    }

    let queue = &config.queue;
    if queue.max_queue == 0 {
        return Err(invalid("queue.max_queue must be positive"));
    }
    if queue.trim_target > queue.max_queue {
        return Err(invalid(format!(
            "queue.trim_target ({}) exceeds queue.max_queue ({})",
            queue.trim_target, queue.max_queue
        )));
    }
    if queue.warn_threshold > queue.max_queue {
        return Err(invalid(format!(
            "queue.warn_threshold ({}) exceeds queue.max_queue ({})",
            queue.warn_threshold, queue.max_queue
        )));
    }

    let playback = &config.playback;
    if playback.pump_interval_ms == 0 {
        return Err(invalid("playback.pump_interval_ms must be positive"));
    }
    if playback.max_schedule_ahead_ms == 0 {
        return Err(invalid("playback.max_schedule_ahead_ms must be positive"));
    }

    let timeout = config.conversation.agent_speaking_timeout_secs;
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err(invalid(
            "conversation.agent_speaking_timeout_secs must be positive",
        ));
    }

    Ok(())
}
