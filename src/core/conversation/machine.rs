//! The conversation state machine.
//!
//! The machine is the single writer of [`ConversationState`]. Transitions
//! are looked up in a fixed table; every (state, event) pair outside the
//! table is a no-op that logs a warning. Side effects on playback and
//! capture are issued through [`MediaControl`] inside the same call that
//! performs the transition, so a barge-in silences the agent before the
//! next event is looked at.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::state::{ConversationEvent, ConversationState, EndReason};
use super::transcript::{Speaker, TranscriptLog};

/// Commands the machine issues to the audio pipeline and capture.
pub trait MediaControl {
    /// Stop every scheduled playback source.
    fn stop_playback(&mut self) -> usize;

    /// Drop everything in the jitter buffer.
    fn clear_queue(&mut self) -> usize;

    /// Whether agent audio is still queued or playing.
    fn playback_active(&self) -> bool;

    /// Pause or resume microphone upload.
    fn set_capture_enabled(&mut self, enabled: bool);

    /// Stop microphone capture for good.
    fn stop_capture(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineConfig {
    /// Seconds `agent_speaking` may last without completing
    pub agent_speaking_timeout: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            agent_speaking_timeout: 30.0,
        }
    }
}

/// One entry of the diagnostic transition log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: &'static str,
    pub at: f64,
}

/// What [`ConversationMachine::handle`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Transitioned {
        from: ConversationState,
        to: ConversationState,
    },
    /// Handled without changing state (transcript, connectivity)
    Applied,
    /// Not defined for the current state
    Ignored,
}

/// Look up the transition for `event` in `state`.
pub fn next_state(
    state: ConversationState,
    event: &ConversationEvent,
) -> Option<ConversationState> {
    use ConversationEvent as E;
    use ConversationState as S;

    if state.is_terminal() {
        return None;
    }

    match (state, event) {
        (_, E::SessionEndCommand | E::AgentEndedSession) => Some(S::Ended),
        (_, E::FatalTransportError { .. } | E::ConnectFailed { .. } | E::InputLost { .. }) => {
            Some(S::Error)
        }
        (S::Idle, E::SessionStartCommand) => Some(S::Connecting),
        (S::Connecting, E::ConnectedAck) => Some(S::AgentSpeaking),
        (S::AgentSpeaking, E::AgentTurnComplete | E::QueueDrained | E::SafetyTimeout) => {
            Some(S::Listening)
        }
        (S::Listening | S::UserSpeaking | S::Processing, E::AgentSpeechResumed) => {
            Some(S::AgentSpeaking)
        }
        (S::AgentSpeaking | S::Listening | S::Processing, E::UserSpeechDetected) => {
            Some(S::UserSpeaking)
        }
        (S::UserSpeaking, E::UserSpeechEnded) => Some(S::Listening),
        (S::Listening, E::AgentProcessing) => Some(S::Processing),
        (S::Processing, E::AgentTurnComplete) => Some(S::Listening),
        _ => None,
    }
}

#[derive(Debug)]
pub struct ConversationMachine {
    config: MachineConfig,
    state: ConversationState,
    status_message: String,
    reconnecting: bool,
    transcript: TranscriptLog,
    transitions: Vec<TransitionRecord>,
    agent_deadline: Option<f64>,
    current_response: Option<String>,
    interrupted_responses: HashSet<String>,
    barge_ins: u64,
    end_reason: Option<EndReason>,
}

impl ConversationMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            state: ConversationState::Idle,
            status_message: ConversationState::Idle.status_message().to_string(),
            reconnecting: false,
            transcript: TranscriptLog::new(),
            transitions: Vec::new(),
            agent_deadline: None,
            current_response: None,
            interrupted_responses: HashSet::new(),
            barge_ins: 0,
            end_reason: None,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn barge_ins(&self) -> u64 {
        self.barge_ins
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    /// When the `agent_speaking` safety valve fires, if armed.
    pub fn agent_deadline(&self) -> Option<f64> {
        self.agent_deadline
    }

    /// Whether agent audio for `response_id` should still be played.
    ///
    /// Audio is refused once the session is over, while the candidate holds
    /// the floor, and for any response the candidate barged in on.
    pub fn accepts_agent_audio(&self, response_id: Option<&str>) -> bool {
        if self.state.is_terminal()
            || matches!(
                self.state,
                ConversationState::Idle | ConversationState::UserSpeaking
            )
        {
            return false;
        }
        match response_id {
            Some(id) => !self.interrupted_responses.contains(id),
            None => true,
        }
    }

    /// Remember which response the agent is currently speaking.
    pub fn note_agent_response(&mut self, response_id: Option<&str>) {
        if let Some(id) = response_id {
            if self.current_response.as_deref() != Some(id) {
                self.current_response = Some(id.to_string());
            }
        }
    }

    /// Feed one event at session-clock time `now`.
    pub fn handle(
        &mut self,
        event: ConversationEvent,
        now: f64,
        media: &mut dyn MediaControl,
    ) -> Outcome {
        if self.state.is_terminal() {
            debug!(state = %self.state, event = event.name(), "Event after session end ignored");
            return Outcome::Ignored;
        }

        match &event {
            ConversationEvent::TranscriptDelta {
                speaker,
                text,
                is_final,
            } => {
                self.transcript.apply_delta(*speaker, text, *is_final, now);
                return Outcome::Applied;
            }
            ConversationEvent::ConnectionLost { reason } => {
                warn!(reason = %reason, state = %self.state, "Connection lost, reconnecting");
                self.reconnecting = true;
                self.status_message = "Connection lost, reconnecting...".to_string();
                return Outcome::Applied;
            }
            ConversationEvent::Reconnected { attempt } => {
                info!(attempt, state = %self.state, "Connection restored");
                self.reconnecting = false;
                self.status_message = self.state.status_message().to_string();
                return Outcome::Applied;
            }
            _ => {}
        }

        let Some(to) = next_state(self.state, &event) else {
            warn!(
                state = %self.state,
                event = event.name(),
                "Undefined transition ignored"
            );
            return Outcome::Ignored;
        };

        let from = self.state;

        // A finished agent turn can still have audio queued behind it
        if to == ConversationState::UserSpeaking
            && (from == ConversationState::AgentSpeaking || media.playback_active())
        {
            self.barge_in(media);
        }

        self.state = to;
        self.status_message = to.status_message().to_string();
        self.transitions.push(TransitionRecord {
            from,
            to,
            event: event.name(),
            at: now,
        });

        self.agent_deadline = if to == ConversationState::AgentSpeaking {
            Some(now + self.config.agent_speaking_timeout)
        } else {
            None
        };

        if to.is_terminal() {
            self.terminate(&event, media);
        } else {
            media.set_capture_enabled(to.streams_microphone());
        }

        info!(from = %from, to = %to, event = event.name(), "Conversation transition");
        Outcome::Transitioned { from, to }
    }

    /// Fire the `agent_speaking` safety valve if it has expired.
    pub fn check_timeout(&mut self, now: f64, media: &mut dyn MediaControl) -> Outcome {
        let expired = self.state == ConversationState::AgentSpeaking
            && self.agent_deadline.is_some_and(|deadline| now >= deadline);
        if !expired {
            return Outcome::Ignored;
        }

        warn!(
            timeout_secs = self.config.agent_speaking_timeout,
            "Agent turn never completed, forcing listening"
        );
        self.handle(ConversationEvent::SafetyTimeout, now, media)
    }

    fn barge_in(&mut self, media: &mut dyn MediaControl) {
        let stopped = media.stop_playback();
        let cleared = media.clear_queue();
        self.transcript.finalize_open(Speaker::Agent);
        if let Some(id) = self.current_response.take() {
            self.interrupted_responses.insert(id);
        }
        self.barge_ins += 1;
        info!(stopped, cleared, "Barge-in: agent playback cut");
    }

    fn terminate(&mut self, event: &ConversationEvent, media: &mut dyn MediaControl) {
        media.stop_playback();
        media.clear_queue();
        media.set_capture_enabled(false);
        media.stop_capture();
        self.transcript.finalize_all();
        self.reconnecting = false;

        self.end_reason = Some(match event {
            ConversationEvent::AgentEndedSession => EndReason::AgentEnded,
            ConversationEvent::FatalTransportError { code, message } => {
                EndReason::TransportError {
                    code: code.clone(),
                    message: message.clone(),
                }
            }
            ConversationEvent::ConnectFailed {
                attempts,
                last_error,
            } => EndReason::ConnectFailed {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            ConversationEvent::InputLost { reason } => EndReason::InputLost {
                reason: reason.clone(),
            },
            _ => EndReason::UserEnded,
        });
    }
}
