//! Conversation turn-taking: state, events, transcript and the state machine
//! that coordinates them.

mod machine;
mod state;
mod transcript;

pub use machine::{
    ConversationMachine, MachineConfig, MediaControl, Outcome, TransitionRecord, next_state,
};
pub use state::{ConversationEvent, ConversationState, EndReason};
pub use transcript::{InterviewTurn, Speaker, TranscriptLog, TranscriptMessage, TranscriptUpdate};
