//! Switchboard session phase machine
//!
//! `Created -> AwaitingHandshakeReply -> Established -> Closed`. The transport
//! may close in any phase; `Closed` is terminal.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Phases and Triggers
// ----------------------------------------------------------------------------

/// Lifecycle phase of a switchboard session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session exists, transport not yet connected
    Created,
    /// `USR` or `ANS` sent, waiting for the `OK` reply
    AwaitingHandshakeReply,
    /// Handshake accepted; commands may flow
    Established,
    /// Transport closed
    Closed,
}

/// Events that move a session between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionTrigger {
    TransportConnected,
    HandshakeAccepted,
    TransportClosed,
}

impl fmt::Display for SessionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionTrigger::TransportConnected => "TransportConnected",
            SessionTrigger::HandshakeAccepted => "HandshakeAccepted",
            SessionTrigger::TransportClosed => "TransportClosed",
        };
        f.write_str(name)
    }
}

/// Result of a successful transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub trigger: SessionTrigger,
}

impl PhaseTransition {
    /// Whether this transition enters `Established`
    pub fn establishes(&self) -> bool {
        self.to == SessionPhase::Established && self.from != SessionPhase::Established
    }

    /// Whether this transition closes a session that had been established
    pub fn closes_established(&self) -> bool {
        self.from == SessionPhase::Established && self.to == SessionPhase::Closed
    }
}

impl fmt::Display for PhaseTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} on {}", self.from, self.to, self.trigger)
    }
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl SessionPhase {
    /// Phase name for logging
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Created => "Created",
            SessionPhase::AwaitingHandshakeReply => "AwaitingHandshakeReply",
            SessionPhase::Established => "Established",
            SessionPhase::Closed => "Closed",
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, SessionPhase::Established)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionPhase::Closed)
    }

    /// Apply a trigger (consumes self)
    pub fn transition(self, trigger: SessionTrigger) -> Result<PhaseTransition, StateTransitionError> {
        use SessionPhase::*;
        use SessionTrigger::*;

        let to = match (self, trigger) {
            (Closed, _) => {
                return Err(StateTransitionError::Terminal { trigger });
            }
            (Created, TransportConnected) => AwaitingHandshakeReply,
            (AwaitingHandshakeReply, HandshakeAccepted) => Established,
            (_, TransportClosed) => Closed,
            (from, trigger) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: from.name().to_string(),
                    trigger,
                    reason: if trigger == TransportConnected {
                        "transport already connected".to_string()
                    } else {
                        "no handshake is pending".to_string()
                    },
                });
            }
        };

        Ok(PhaseTransition {
            from: self,
            to,
            trigger,
        })
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Rejected phase transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// Trigger is not valid in the current phase
    InvalidTransition {
        from_state: String,
        trigger: SessionTrigger,
        reason: String,
    },
    /// The session is closed
    Terminal { trigger: SessionTrigger },
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransitionError::InvalidTransition {
                from_state,
                trigger,
                reason,
            } => {
                write!(
                    f,
                    "Invalid transition from {} on {}: {}",
                    from_state, trigger, reason
                )
            }
            StateTransitionError::Terminal { trigger } => {
                write!(f, "Session is closed, ignoring {}", trigger)
            }
        }
    }
}

impl std::error::Error for StateTransitionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let step = SessionPhase::Created
            .transition(SessionTrigger::TransportConnected)
            .unwrap();
        assert_eq!(step.to, SessionPhase::AwaitingHandshakeReply);

        let step = step.to.transition(SessionTrigger::HandshakeAccepted).unwrap();
        assert!(step.establishes());

        let step = step.to.transition(SessionTrigger::TransportClosed).unwrap();
        assert!(step.closes_established());
        assert!(step.to.is_closed());
    }

    #[test]
    fn test_transition_display() {
        let step = SessionPhase::Created
            .transition(SessionTrigger::TransportConnected)
            .unwrap();
        assert_eq!(
            step.to_string(),
            "Created -> AwaitingHandshakeReply on TransportConnected"
        );
    }

    #[test]
    fn test_close_before_established() {
        let step = SessionPhase::AwaitingHandshakeReply
            .transition(SessionTrigger::TransportClosed)
            .unwrap();
        assert_eq!(step.to, SessionPhase::Closed);
        assert!(!step.closes_established());
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(SessionPhase::Created
            .transition(SessionTrigger::HandshakeAccepted)
            .is_err());
        assert!(SessionPhase::Established
            .transition(SessionTrigger::HandshakeAccepted)
            .is_err());
        assert!(matches!(
            SessionPhase::Closed.transition(SessionTrigger::TransportClosed),
            Err(StateTransitionError::Terminal { .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = SessionPhase::Established
            .transition(SessionTrigger::TransportConnected)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition from Established on TransportConnected: transport already connected"
        );
    }
}
