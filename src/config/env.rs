//! Environment variable overrides.

use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, ConfigResult, EngineConfig};
use crate::core::router::ProviderKind;

/// Every variable this module reads.
pub(crate) const ENV_VARS: [&str; 14] = [
    "INTERVIEW_RELAY_URL",
    "INTERVIEW_PROVIDER",
    "INTERVIEW_SAMPLE_RATE",
    "INTERVIEW_OUTPUT_SAMPLE_RATE",
    "INTERVIEW_CHUNK_MS",
    "INTERVIEW_MAX_QUEUE",
    "INTERVIEW_TRIM_TARGET",
    "INTERVIEW_QUEUE_WARN",
    "INTERVIEW_AGENT_TIMEOUT_SECS",
    "INTERVIEW_CONNECT_ATTEMPTS",
    "INTERVIEW_CONNECT_BASE_DELAY_MS",
    "INTERVIEW_CONNECT_TIMEOUT_MS",
    "INTERVIEW_REPORT_DIR",
    "INTERVIEW_NON_FATAL_ERROR_CODES",
];

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &'static str) -> ConfigResult<Option<T>> {
    match env_string(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        None => Ok(None),
    }
}

/// Apply environment variables on top of `config`.
pub(crate) fn apply_env(config: &mut EngineConfig) -> ConfigResult<()> {
    if let Some(url) = env_string("INTERVIEW_RELAY_URL") {
        config.connection.relay_url = url;
    }
    if let Some(value) = env_string("INTERVIEW_PROVIDER") {
        config.router.provider = value
            .parse::<ProviderKind>()
            .map_err(|_| ConfigError::InvalidEnv {
                name: "INTERVIEW_PROVIDER",
                value,
            })?;
    }
    if let Some(codes) = env_string("INTERVIEW_NON_FATAL_ERROR_CODES") {
        config.router.non_fatal_error_codes = codes
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }

    if let Some(rate) = env_parse("INTERVIEW_SAMPLE_RATE")? {
        config.audio.target_sample_rate = rate;
    }
    if let Some(rate) = env_parse("INTERVIEW_OUTPUT_SAMPLE_RATE")? {
        config.output.sample_rate = rate;
    }
    if let Some(ms) = env_parse("INTERVIEW_CHUNK_MS")? {
        config.audio.chunk_ms = ms;
    }

    if let Some(max) = env_parse("INTERVIEW_MAX_QUEUE")? {
        config.queue.max_queue = max;
    }
    if let Some(trim) = env_parse("INTERVIEW_TRIM_TARGET")? {
        config.queue.trim_target = trim;
    }
    if let Some(warn) = env_parse("INTERVIEW_QUEUE_WARN")? {
        config.queue.warn_threshold = warn;
    }

    if let Some(secs) = env_parse("INTERVIEW_AGENT_TIMEOUT_SECS")? {
        config.conversation.agent_speaking_timeout_secs = secs;
    }

    if let Some(attempts) = env_parse("INTERVIEW_CONNECT_ATTEMPTS")? {
        config.connection.reconnection.max_attempts = attempts;
    }
    if let Some(delay) = env_parse("INTERVIEW_CONNECT_BASE_DELAY_MS")? {
        config.connection.reconnection.initial_delay_ms = delay;
    }
    if let Some(timeout) = env_parse("INTERVIEW_CONNECT_TIMEOUT_MS")? {
        config.connection.reconnection.connect_timeout_ms = timeout;
    }

    if let Some(dir) = env_string("INTERVIEW_REPORT_DIR") {
        config.output.report_dir = PathBuf::from(dir);
    }

    Ok(())
}
