//! Append-only interview transcript.
//!
//! Each speaker has at most one open (non-final) entry. Partial hypotheses
//! replace the open entry in place; a final delta closes it. Entries are
//! stamped when first seen and stamps never go backwards, so the log is
//! ordered by timestamp. Final entries are never rewritten.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

impl Speaker {
    fn slot(self) -> usize {
        match self {
            Speaker::Agent => 0,
            Speaker::User => 1,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Agent => write!(f, "agent"),
            Speaker::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub speaker: Speaker,
    pub text: String,
    #[serde(rename = "isFinal")]
    pub is_final: bool,
    /// Session clock seconds when the utterance was first seen
    pub timestamp: f64,
}

/// A question and the candidate's answer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewTurn {
    pub turn: u32,
    pub question: String,
    pub answer: String,
}

/// Effect of one delta on the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptUpdate {
    /// A new entry was appended
    Appended,
    /// The open partial entry was replaced in place
    Replaced,
    /// The open partial entry was finalized
    Finalized,
    /// Nothing to record
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptMessage>,
    open: [Option<usize>; 2],
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_delta(
        &mut self,
        speaker: Speaker,
        text: &str,
        is_final: bool,
        timestamp: f64,
    ) -> TranscriptUpdate {
        let text = text.trim();

        if let Some(index) = self.open[speaker.slot()] {
            let entry = &mut self.entries[index];
            if !text.is_empty() {
                entry.text = text.to_string();
            }
            if is_final {
                entry.is_final = true;
                self.open[speaker.slot()] = None;
                return TranscriptUpdate::Finalized;
            }
            return if text.is_empty() {
                TranscriptUpdate::Ignored
            } else {
                TranscriptUpdate::Replaced
            };
        }

        if text.is_empty() {
            return TranscriptUpdate::Ignored;
        }

        let floor = self.entries.last().map_or(timestamp, |last| last.timestamp);
        self.entries.push(TranscriptMessage {
            speaker,
            text: text.to_string(),
            is_final,
            timestamp: timestamp.max(floor),
        });
        if !is_final {
            self.open[speaker.slot()] = Some(self.entries.len() - 1);
        }
        TranscriptUpdate::Appended
    }

    /// Close the speaker's open entry as-is, e.g. when the agent is cut off.
    pub fn finalize_open(&mut self, speaker: Speaker) -> bool {
        match self.open[speaker.slot()].take() {
            Some(index) => {
                self.entries[index].is_final = true;
                true
            }
            None => false,
        }
    }

    pub fn finalize_all(&mut self) {
        self.finalize_open(Speaker::Agent);
        self.finalize_open(Speaker::User);
    }

    pub fn entries(&self) -> &[TranscriptMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pair agent questions with the candidate answers that follow them.
    ///
    /// Consecutive utterances by the same speaker are joined. A question
    /// without an answer does not form a turn.
    pub fn turns(&self) -> Vec<InterviewTurn> {
        let mut turns = Vec::new();
        let mut question = String::new();
        let mut answer = String::new();

        for entry in self.entries.iter().filter(|e| e.is_final) {
            match entry.speaker {
                Speaker::Agent => {
                    if !answer.is_empty() {
                        turns.push(InterviewTurn {
                            turn: turns.len() as u32 + 1,
                            question: std::mem::take(&mut question),
                            answer: std::mem::take(&mut answer),
                        });
                    }
                    append(&mut question, &entry.text);
                }
                Speaker::User => append(&mut answer, &entry.text),
            }
        }

        if !answer.is_empty() {
            turns.push(InterviewTurn {
                turn: turns.len() as u32 + 1,
                question,
                answer,
            });
        }
        turns
    }
}

fn append(buf: &mut String, text: &str) {
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_replace_in_place() {
        let mut log = TranscriptLog::new();
        assert_eq!(
            log.apply_delta(Speaker::Agent, "Tell me", false, 1.0),
            TranscriptUpdate::Appended
        );
        assert_eq!(
            log.apply_delta(Speaker::Agent, "Tell me about", false, 1.2),
            TranscriptUpdate::Replaced
        );
        assert_eq!(
            log.apply_delta(Speaker::Agent, "Tell me about yourself.", true, 1.5),
            TranscriptUpdate::Finalized
        );

        assert_eq!(log.len(), 1);
        let entry = &log.entries()[0];
        assert_eq!(entry.text, "Tell me about yourself.");
        assert!(entry.is_final);
        // Keeps the first-seen stamp
        assert_eq!(entry.timestamp, 1.0);
    }

    #[test]
    fn test_final_entries_never_replaced() {
        let mut log = TranscriptLog::new();
        log.apply_delta(Speaker::User, "I am a developer.", true, 2.0);
        log.apply_delta(Speaker::User, "I like Rust", false, 3.0);

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].text, "I am a developer.");
        assert!(log.entries()[0].is_final);
        assert!(!log.entries()[1].is_final);
    }

    #[test]
    fn test_speakers_interleave_independently() {
        let mut log = TranscriptLog::new();
        log.apply_delta(Speaker::Agent, "So", false, 1.0);
        log.apply_delta(Speaker::User, "Hi", false, 1.1);
        log.apply_delta(Speaker::Agent, "So, why Rust?", true, 1.2);
        log.apply_delta(Speaker::User, "Hi there", true, 1.3);

        let texts: Vec<&str> = log.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["So, why Rust?", "Hi there"]);
        assert!(log.entries().iter().all(|e| e.is_final));
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut log = TranscriptLog::new();
        log.apply_delta(Speaker::Agent, "first", true, 5.0);
        log.apply_delta(Speaker::User, "late clock", true, 4.0);
        log.apply_delta(Speaker::Agent, "third", true, 6.0);

        let stamps: Vec<f64> = log.entries().iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_empty_deltas_ignored() {
        let mut log = TranscriptLog::new();
        assert_eq!(
            log.apply_delta(Speaker::User, "   ", false, 0.0),
            TranscriptUpdate::Ignored
        );
        assert_eq!(
            log.apply_delta(Speaker::User, "", true, 0.0),
            TranscriptUpdate::Ignored
        );
        assert!(log.is_empty());

        log.apply_delta(Speaker::User, "hello", false, 0.0);
        // Empty final closes the open entry with its last text
        assert_eq!(
            log.apply_delta(Speaker::User, "", true, 0.1),
            TranscriptUpdate::Finalized
        );
        assert_eq!(log.entries()[0].text, "hello");
    }

    #[test]
    fn test_finalize_open() {
        let mut log = TranscriptLog::new();
        log.apply_delta(Speaker::Agent, "Let me ask", false, 0.0);
        assert!(log.finalize_open(Speaker::Agent));
        assert!(!log.finalize_open(Speaker::Agent));

        log.apply_delta(Speaker::Agent, "Next question", false, 1.0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_turns_pair_questions_with_answers() {
        let mut log = TranscriptLog::new();
        log.apply_delta(Speaker::Agent, "Welcome.", true, 0.0);
        log.apply_delta(Speaker::Agent, "Tell me about yourself.", true, 1.0);
        log.apply_delta(Speaker::User, "I build audio software.", true, 2.0);
        log.apply_delta(Speaker::Agent, "Why Rust?", true, 3.0);
        log.apply_delta(Speaker::User, "Safety.", true, 4.0);
        log.apply_delta(Speaker::User, "And speed.", true, 5.0);
        log.apply_delta(Speaker::Agent, "Thanks, that's all.", true, 6.0);

        let turns = log.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn, 1);
        assert_eq!(turns[0].question, "Welcome. Tell me about yourself.");
        assert_eq!(turns[0].answer, "I build audio software.");
        assert_eq!(turns[1].question, "Why Rust?");
        assert_eq!(turns[1].answer, "Safety. And speed.");
    }

    #[test]
    fn test_message_serializes_is_final_camel_case() {
        let msg = TranscriptMessage {
            speaker: Speaker::Agent,
            text: "hi".to_string(),
            is_final: true,
            timestamp: 0.5,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["speaker"], "agent");
        assert_eq!(json["isFinal"], true);
    }
}
