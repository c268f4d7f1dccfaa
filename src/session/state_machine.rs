use serde::{Deserialize, Serialize};
use tracing::debug;

use super::aggregator::TranscriptAggregator;
use crate::protocol::{Envelope, Payload, Role};

/// Accumulation state of one role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Idle,
    /// Fragments are merged into the transcript entry at `slot`
    Accumulating { slot: usize },
}

/// Presentation hints derived from inbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    /// Agent audio is arriving for the current turn
    pub agent_responding: bool,
    /// User speech is being recognised for the current turn
    pub user_speaking: bool,
}

/// What the session must do with the audio pipeline after an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    None,
    /// Enqueue this PCM for playback
    Play(Vec<u8>),
    /// Flush everything queued for playback
    CancelPlayback,
}

/// Classifies inbound envelopes and drives per-role turns
///
/// Pure state: no I/O happens here. Open messages are tracked per instance, so
/// any number of sessions can run side by side.
pub struct SessionStateMachine {
    transcript: TranscriptAggregator,
    user: Turn,
    agent: Turn,
    indicators: Indicators,
    turns_completed: u64,
    interruptions: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            transcript: TranscriptAggregator::new(),
            user: Turn::Idle,
            agent: Turn::Idle,
            indicators: Indicators::default(),
            turns_completed: 0,
            interruptions: 0,
        }
    }

    pub fn transcript(&self) -> &TranscriptAggregator {
        &self.transcript
    }

    pub fn turn(&self, role: Role) -> Turn {
        match role {
            Role::User => self.user,
            Role::Agent => self.agent,
        }
    }

    pub fn indicators(&self) -> Indicators {
        self.indicators
    }

    pub fn turns_completed(&self) -> u64 {
        self.turns_completed
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    /// Apply one decoded inbound envelope
    ///
    /// Rules are evaluated in order and the first match wins.
    pub fn handle(&mut self, envelope: Envelope) -> Dispatch {
        if envelope.turn_complete {
            self.complete_turn();
            return Dispatch::None;
        }

        if envelope.interrupted {
            debug!("Agent reported interruption");
            self.interruptions += 1;
            self.indicators.agent_responding = false;
            return Dispatch::CancelPlayback;
        }

        match envelope.payload {
            Payload::Audio(pcm) => {
                if !envelope.is_user_transcript {
                    self.indicators.agent_responding = true;
                }
                Dispatch::Play(pcm)
            }
            Payload::Text(text) if envelope.is_user_transcript && envelope.role == Some(Role::User) => {
                self.indicators.user_speaking = true;
                self.append(Role::User, &text, true);
                Dispatch::None
            }
            Payload::Text(text) => {
                let role = envelope.role.unwrap_or(Role::Agent);
                self.append(role, &text, envelope.is_transcript);
                Dispatch::None
            }
            Payload::None => Dispatch::None,
        }
    }

    /// Record typed text that was just transmitted
    ///
    /// The echo is final on arrival, so any user message still accumulating is
    /// closed first to keep history in order.
    pub fn record_outbound_text(&mut self, text: &str) -> usize {
        if let Turn::Accumulating { slot } = self.user {
            self.transcript.close(slot);
            self.user = Turn::Idle;
        }
        self.transcript.push_closed(Role::User, text, false)
    }

    /// Local barge-in: the agent is no longer considered to be responding
    pub fn record_local_interrupt(&mut self) {
        self.interruptions += 1;
        self.indicators.agent_responding = false;
    }

    fn complete_turn(&mut self) {
        for turn in [&mut self.user, &mut self.agent] {
            if let Turn::Accumulating { slot } = *turn {
                self.transcript.close(slot);
            }
            *turn = Turn::Idle;
        }
        self.indicators = Indicators::default();
        self.turns_completed += 1;
    }

    fn append(&mut self, role: Role, fragment: &str, is_transcript: bool) {
        let turn = match role {
            Role::User => &mut self.user,
            Role::Agent => &mut self.agent,
        };

        match *turn {
            Turn::Accumulating { slot } => self.transcript.extend(slot, fragment),
            Turn::Idle => {
                if let Some(slot) = self.transcript.open(role, fragment, is_transcript) {
                    *turn = Turn::Accumulating { slot };
                }
            }
        }
    }
}
