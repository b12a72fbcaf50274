//! Lifecycle event sink
//!
//! One-way notifications for observers such as a dashboard. `emit` never
//! awaits; slow subscribers lag instead of stalling the mission.

use super::result::MissionStatus;
use crate::bus::{Alert, SecurityEvent};
use crate::agent::ReportStatus;
use crate::types::{Phase, ThreatLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionEvent {
    MissionStarted {
        mission_id: String,
        agents: Vec<String>,
        at: DateTime<Utc>,
    },
    PhaseEntered {
        mission_id: String,
        phase: Phase,
        attempt: u32,
        agents: Vec<String>,
    },
    PhaseCompleted {
        mission_id: String,
        phase: Phase,
        attempt: u32,
        success_ratio: f64,
        threat_level: ThreatLevel,
        reports: Vec<(String, ReportStatus)>,
    },
    PhaseRetried {
        mission_id: String,
        phase: Phase,
        attempt: u32,
        reason: String,
    },
    AlertRaised {
        mission_id: String,
        alert: Alert,
    },
    SecurityEvent {
        mission_id: String,
        event: SecurityEvent,
    },
    MissionCompleted {
        mission_id: String,
        status: MissionStatus,
        final_phase: Phase,
        at: DateTime<Utc>,
    },
}

impl MissionEvent {
    pub fn mission_id(&self) -> &str {
        match self {
            MissionEvent::MissionStarted { mission_id, .. }
            | MissionEvent::PhaseEntered { mission_id, .. }
            | MissionEvent::PhaseCompleted { mission_id, .. }
            | MissionEvent::PhaseRetried { mission_id, .. }
            | MissionEvent::AlertRaised { mission_id, .. }
            | MissionEvent::SecurityEvent { mission_id, .. }
            | MissionEvent::MissionCompleted { mission_id, .. } => mission_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            MissionEvent::MissionStarted { .. } => "mission_started",
            MissionEvent::PhaseEntered { .. } => "phase_entered",
            MissionEvent::PhaseCompleted { .. } => "phase_completed",
            MissionEvent::PhaseRetried { .. } => "phase_retried",
            MissionEvent::AlertRaised { .. } => "alert_raised",
            MissionEvent::SecurityEvent { .. } => "security_event",
            MissionEvent::MissionCompleted { .. } => "mission_completed",
        }
    }
}

/// Broadcast-based event emitter
pub struct EventEmitter {
    tx: broadcast::Sender<MissionEvent>,
    emit_count: AtomicU64,
}

impl EventEmitter {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Returns the number of subscribers that received the event
    pub fn emit(&self, event: MissionEvent) -> usize {
        self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Receives every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}
