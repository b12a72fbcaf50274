//! Message types carried by the bus

use super::auth::AuthToken;
use crate::agent::{AgentReport, PhaseDirective};
use crate::intel::IntelligenceReport;
use crate::types::{Phase, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bus address of the mission orchestrator
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Bus address of the intelligence fusion engine
pub const FUSION_ID: &str = "fusion";

/// Wildcard key used when authenticating broadcasts
pub const BROADCAST_KEY: &str = "*";

/// Where a message is going
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Endpoint(String),
    Broadcast,
}

impl Recipient {
    pub fn endpoint(id: impl Into<String>) -> Self {
        Recipient::Endpoint(id.into())
    }

    /// Key used for challenge bookkeeping
    pub fn key(&self) -> &str {
        match self {
            Recipient::Endpoint(id) => id,
            Recipient::Broadcast => BROADCAST_KEY,
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Stage of a situation report relative to the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitrepStage {
    Entry,
    Progress,
    Exit,
}

/// Situation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sitrep {
    pub agent_id: String,
    pub phase: Phase,
    pub attempt: u32,
    pub stage: SitrepStage,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Agent reported FAILED after spending its retry budget
    AgentFailure,
    /// Agent hit an unrecoverable fault
    AgentFault,
    /// Fused risk crossed the critical threshold
    ThreatEscalation,
    Security,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub source: String,
    pub phase: Phase,
    pub detail: String,
    /// Targets the alert concerns, empty when not target-specific
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Typed message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Directive(PhaseDirective),
    Sitrep(Sitrep),
    Report(AgentReport),
    Intel(IntelligenceReport),
    Alert(Alert),
    /// Mission over; agents exit their loops
    Shutdown,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Directive(_) => "directive",
            Payload::Sitrep(_) => "sitrep",
            Payload::Report(_) => "report",
            Payload::Intel(_) => "intel",
            Payload::Alert(_) => "alert",
            Payload::Shutdown => "shutdown",
        }
    }
}

/// An outgoing message before the bus stamps it
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: String,
    pub recipient: Recipient,
    pub priority: Priority,
    pub payload: Payload,
    pub token: AuthToken,
}

/// A delivered message. Immutable once the bus has stamped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    sender: String,
    recipient: Recipient,
    priority: Priority,
    payload: Payload,
    token: AuthToken,
    sequence: u64,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub(crate) fn stamp(envelope: Envelope, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: envelope.sender,
            recipient: envelope.recipient,
            priority: envelope.priority,
            payload: envelope.payload,
            token: envelope.token,
            sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Per-sender sequence number, strictly increasing in send order
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
