pub mod url_validation;
pub use url_validation::{UrlValidationError, is_loopback_host, validate_relay_url};
