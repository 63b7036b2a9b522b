//! Provider message routing.

mod base;
pub mod openai;
mod relay;

pub use base::{
    AudioFraming, MessageRouter, ProviderKind, Routed, RouterConfig, RouterError, RouterResult,
    create_router,
};
pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAiRouter};
pub use relay::{RelayInbound, RelayOutbound, RelayRouter};
