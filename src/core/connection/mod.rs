//! Relay transport: connection lifecycle, retry policy and the WebSocket
//! implementation.

mod base;
mod manager;
mod websocket;

pub use base::{
    ConnectionAttempt, ConnectionError, ConnectionEvent, ConnectionResult, ConnectionState,
    Connector, ConnectorFactory, ReconnectionConfig, TransportLink, WireFrame,
};
pub use manager::{
    AudioSender, ConnectionManager, ConnectionStats, DEFAULT_AUDIO_CHANNEL_CAPACITY,
};
pub use websocket::{WebSocketConnector, WebSocketConnectorFactory, WebSocketLink};
