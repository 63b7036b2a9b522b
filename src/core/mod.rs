pub mod audio;
pub mod connection;
pub mod conversation;
pub mod engine;
pub mod router;
pub mod session;
pub mod sink;

// Re-export commonly used types for convenience
pub use audio::{AudioError, AudioPipeline, AudioResult, WireAudio};
pub use connection::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState, ReconnectionConfig,
    WebSocketConnectorFactory, WireFrame,
};
pub use conversation::{
    ConversationEvent, ConversationMachine, ConversationState, EndReason, Speaker,
    TranscriptMessage,
};
pub use engine::{
    EngineCommand, EngineError, EngineEvent, EngineResult, EngineSnapshot, InterviewEngine,
};
pub use router::{MessageRouter, ProviderKind, RouterConfig, create_router};
pub use session::{InterviewContext, Session, SessionConfig, VoiceParams};
pub use sink::{ChannelSink, JsonFileSink, SessionReport, SessionSink, SessionStats};
