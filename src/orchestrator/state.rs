//! Mission state machine
//!
//! Exactly one active phase at a time. Transitions only move forward, stay
//! put for a retry, or go to ABORTED; terminal states are final.

use crate::agent::AgentReport;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Advanced,
    Retried,
    Aborted,
}

/// One attempt at one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Agents dispatched for this attempt
    pub selected: Vec<String>,
    pub reports: Vec<AgentReport>,
    pub success_ratio: Option<f64>,
    pub outcome: Option<PhaseOutcome>,
}

impl PhaseRecord {
    pub fn has_report_from(&self, agent_id: &str) -> bool {
        self.reports.iter().any(|r| r.agent_id == agent_id)
    }

    /// Selected agents that have not reported yet
    pub fn pending(&self) -> Vec<String> {
        self.selected
            .iter()
            .filter(|id| !self.has_report_from(id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionState {
    mission_id: String,
    phase: Phase,
    history: Vec<PhaseRecord>,
    retries: BTreeMap<Phase, u32>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl MissionState {
    pub fn new(mission_id: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            phase: Phase::Infil,
            history: Vec::new(),
            retries: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn mission_id(&self) -> &str {
        &self.mission_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PhaseRecord> {
        self.history
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn retries_for(&self, phase: Phase) -> u32 {
        self.retries.get(&phase).copied().unwrap_or(0)
    }

    pub fn total_retries(&self) -> u32 {
        self.retries.values().sum()
    }

    /// The attempt currently open, if any
    pub fn active_record(&self) -> Option<&PhaseRecord> {
        self.history.last().filter(|r| r.outcome.is_none())
    }

    /// Open a new attempt of the current phase. Returns the attempt number.
    pub fn begin_attempt(&mut self, selected: Vec<String>) -> u32 {
        let attempt = self.retries_for(self.phase);
        self.history.push(PhaseRecord {
            phase: self.phase,
            attempt,
            started_at: Utc::now(),
            finished_at: None,
            selected,
            reports: Vec::new(),
            success_ratio: None,
            outcome: None,
        });
        attempt
    }

    /// Accept a report for the open attempt. Reports for another phase or
    /// attempt, from unselected agents, or duplicates are ignored.
    pub fn record_report(&mut self, report: AgentReport) -> bool {
        let Some(record) = self.history.last_mut().filter(|r| r.outcome.is_none()) else {
            return false;
        };
        let accepted = report.phase == record.phase
            && report.attempt == record.attempt
            && record.selected.contains(&report.agent_id)
            && !record.has_report_from(&report.agent_id);
        if accepted {
            record.reports.push(report);
        } else {
            debug!(
                agent_id = %report.agent_id,
                phase = %report.phase,
                attempt = report.attempt,
                "Ignoring stale or duplicate report"
            );
        }
        accepted
    }

    pub fn all_reported(&self) -> bool {
        self.active_record().map(|r| r.pending().is_empty()).unwrap_or(true)
    }

    /// Fill in a report for every agent that missed the barrier.
    /// Returns the ids that were synthesized.
    pub fn synthesize_missing<F>(&mut self, mut make: F) -> Vec<String>
    where
        F: FnMut(&str, Phase, u32) -> AgentReport,
    {
        let Some(record) = self.history.last_mut().filter(|r| r.outcome.is_none()) else {
            return Vec::new();
        };
        let missing = record.pending();
        for id in &missing {
            record.reports.push(make(id, record.phase, record.attempt));
        }
        missing
    }

    /// Close the open attempt
    pub fn close_attempt(&mut self, outcome: PhaseOutcome, success_ratio: Option<f64>) {
        if let Some(record) = self.history.last_mut().filter(|r| r.outcome.is_none()) {
            record.finished_at = Some(Utc::now());
            record.outcome = Some(outcome);
            record.success_ratio = success_ratio;
        }
    }

    /// Move the state machine. Staying on the current phase counts a retry.
    pub fn transition(&mut self, to: Phase) -> bool {
        if !self.phase.can_transition(to) {
            error!(
                mission_id = %self.mission_id,
                from = %self.phase,
                to = %to,
                "Rejected illegal phase transition"
            );
            return false;
        }
        if to == self.phase {
            *self.retries.entry(to).or_default() += 1;
        }
        self.phase = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }
}
