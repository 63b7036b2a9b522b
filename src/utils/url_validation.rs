//! Relay URL validation
//!
//! The relay is reached over WebSocket. A URL is accepted when it:
//! - uses the `ws` or `wss` scheme
//! - has a host
//! - carries no userinfo (the token travels in the `Authorization` header)
//!
//! Plain `ws` to a non-loopback host is accepted with a warning.

use std::net::IpAddr;

use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be ws or wss, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not embed credentials")]
    CredentialsInUrl,
}

/// Whether the URL points at this machine.
pub fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Parse and validate a relay WebSocket URL.
pub fn validate_relay_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(UrlValidationError::CredentialsInUrl);
    }

    if parsed.scheme() == "ws" && !is_loopback_host(&parsed) {
        warn!(
            host = parsed.host_str().unwrap_or_default(),
            "Relay URL uses unencrypted ws:// to a remote host"
        );
    }

    Ok(parsed)
}
