//! Error taxonomy
//!
//! Bus and agent errors are recoverable signals handled inside a mission.
//! `MissionError` is the only error that escapes `execute_mission`, and only
//! before the mission starts. Everything that goes wrong after that is
//! reported as an `AbortReason` inside the mission result.

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the message bus
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Challenge-response check failed; the message was dropped
    #[error("authentication failed for message from {sender} to {recipient}: {reason}")]
    Authentication {
        sender: String,
        recipient: String,
        reason: String,
    },
    /// Backpressure: the recipient's mailbox is at capacity
    #[error("mailbox of {recipient} is saturated ({capacity} messages queued)")]
    QueueSaturated { recipient: String, capacity: usize },
    #[error("unknown recipient {0}")]
    UnknownRecipient(String),
    #[error("endpoint {0} is not registered on the bus")]
    UnknownSender(String),
    /// The mission was cancelled while waiting for a message
    #[error("receive cancelled")]
    Cancelled,
}

/// Errors raised while an agent executes a phase
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Recoverable (timeout, unreachable target); retried within the agent's budget
    #[error("transient failure against {target}: {reason}")]
    Transient { target: String, reason: String },
    /// Unrecoverable internal fault; the agent goes to ERROR
    #[error("fatal fault: {0}")]
    Fatal(String),
    #[error("directive rejected: {0}")]
    InvalidDirective(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient { .. })
    }
}

/// Errors that prevent a mission from starting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissionError {
    #[error("invalid mission parameters: {0}")]
    InvalidParameters(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid roster: {0}")]
    InvalidRoster(String),
}

/// Why a mission ended in ABORTED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// An agent raised a FLASH fault
    AgentFatal {
        agent_id: String,
        phase: Phase,
        detail: String,
    },
    /// Fused risk crossed the critical threshold or the abort level
    ThreatEscalation {
        phase: Phase,
        targets: Vec<String>,
        score: f64,
    },
    /// Too few passing reports and the failures were not transient
    GateFailed {
        phase: Phase,
        success_ratio: f64,
        required: f64,
    },
    /// Transient failures persisted through every allowed retry
    RetriesExhausted { phase: Phase, retries: u32 },
    MissionTimeout { phase: Phase },
    /// External cancellation (user abort)
    Cancelled { phase: Phase },
}

impl AbortReason {
    pub fn phase(&self) -> Phase {
        match self {
            AbortReason::AgentFatal { phase, .. }
            | AbortReason::ThreatEscalation { phase, .. }
            | AbortReason::GateFailed { phase, .. }
            | AbortReason::RetriesExhausted { phase, .. }
            | AbortReason::MissionTimeout { phase }
            | AbortReason::Cancelled { phase } => *phase,
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::AgentFatal { agent_id, phase, detail } => {
                write!(f, "agent {} faulted during {}: {}", agent_id, phase, detail)
            }
            AbortReason::ThreatEscalation { phase, targets, score } => write!(
                f,
                "threat escalation during {} (risk {:.2}) on {}",
                phase,
                score,
                targets.join(", ")
            ),
            AbortReason::GateFailed { phase, success_ratio, required } => write!(
                f,
                "{} gate failed: success ratio {:.2} below required {:.2}",
                phase, success_ratio, required
            ),
            AbortReason::RetriesExhausted { phase, retries } => {
                write!(f, "{} still failing after {} retries", phase, retries)
            }
            AbortReason::MissionTimeout { phase } => write!(f, "mission timed out during {}", phase),
            AbortReason::Cancelled { phase } => write!(f, "mission cancelled during {}", phase),
        }
    }
}
