//! Mission result and consolidated summary

use super::state::{PhaseOutcome, PhaseRecord};
use crate::agent::{Agent, Capability, ReportStatus};
use crate::error::AbortReason;
use crate::intel::ThreatAssessment;
use crate::types::{AgentStatus, Phase, Squad, ThreatLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const TOP_RISKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    /// Completed with every agent fully successful and no retries
    Success,
    /// Completed, but with retries or partial reports
    Partial,
    Aborted,
}

impl MissionStatus {
    pub fn determine(final_phase: Phase, history: &[PhaseRecord], total_retries: u32) -> Self {
        if final_phase != Phase::Completed {
            return MissionStatus::Aborted;
        }
        let clean = history
            .iter()
            .filter(|r| r.outcome == Some(PhaseOutcome::Advanced))
            .all(|r| r.reports.iter().all(|rep| rep.status == ReportStatus::Success));
        if clean && total_retries == 0 {
            MissionStatus::Success
        } else {
            MissionStatus::Partial
        }
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionStatus::Success => write!(f, "SUCCESS"),
            MissionStatus::Partial => write!(f, "PARTIAL"),
            MissionStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub attempts: u32,
    pub agents: usize,
    pub passing: usize,
    pub failed: usize,
    pub success_ratio: Option<f64>,
}

/// Consolidated view built in CONSOLIDATE (or from partial history on abort)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSummary {
    pub phases: Vec<PhaseSummary>,
    /// Fraction of passing reports per capability across all attempts
    pub capability_success: BTreeMap<Capability, f64>,
    pub total_probes: u32,
    pub total_errors: u32,
    pub blocked_probes: u32,
    pub average_latency_ms: f64,
    pub threat_level: ThreatLevel,
    pub top_risks: Vec<(String, f64)>,
}

impl MissionSummary {
    pub fn build(history: &[PhaseRecord], assessment: &ThreatAssessment) -> Self {
        let mut phases: Vec<PhaseSummary> = Vec::new();
        let mut per_capability: BTreeMap<Capability, (u32, u32)> = BTreeMap::new();
        let mut total_probes = 0;
        let mut total_errors = 0;
        let mut blocked_probes = 0;
        let mut latency_total = 0u64;
        let mut answered = 0u32;

        for record in history {
            let passing = record.reports.iter().filter(|r| r.is_passing()).count();
            let summary = PhaseSummary {
                phase: record.phase,
                attempts: record.attempt + 1,
                agents: record.selected.len(),
                passing,
                failed: record.reports.len() - passing,
                success_ratio: record.success_ratio,
            };
            // latest attempt of a phase replaces earlier ones
            match phases.iter_mut().find(|p| p.phase == record.phase) {
                Some(existing) => *existing = summary,
                None => phases.push(summary),
            }

            for report in &record.reports {
                let entry = per_capability.entry(report.capability).or_default();
                entry.1 += 1;
                if report.is_passing() {
                    entry.0 += 1;
                }
                total_probes += report.metrics.probes;
                total_errors += report.metrics.errors;
                blocked_probes += report.metrics.blocked;
                latency_total += report.metrics.total_latency_ms;
                answered += report.metrics.probes.saturating_sub(report.metrics.errors);
            }
        }

        Self {
            phases,
            capability_success: per_capability
                .into_iter()
                .map(|(c, (pass, total))| (c, f64::from(pass) / f64::from(total.max(1))))
                .collect(),
            total_probes,
            total_errors,
            blocked_probes,
            average_latency_ms: if answered == 0 {
                0.0
            } else {
                latency_total as f64 / f64::from(answered)
            },
            threat_level: assessment.overall_level,
            top_risks: assessment.top_risks(TOP_RISKS),
        }
    }
}

/// One finding, attributed to the agent and phase that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub phase: Phase,
    pub attempt: u32,
    pub agent_id: String,
    pub capability: Capability,
    pub detail: String,
}

pub fn collect_findings(history: &[PhaseRecord]) -> Vec<Finding> {
    history
        .iter()
        .flat_map(|record| {
            record.reports.iter().flat_map(move |report| {
                report.findings.iter().map(move |detail| Finding {
                    phase: record.phase,
                    attempt: record.attempt,
                    agent_id: report.agent_id.clone(),
                    capability: report.capability,
                    detail: detail.clone(),
                })
            })
        })
        .collect()
}

/// Final state of a roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub capability: Capability,
    pub squad: Squad,
    pub status: AgentStatus,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub error_count: u32,
}

impl From<&Agent> for AgentSnapshot {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            capability: agent.capability,
            squad: agent.squad,
            status: agent.status,
            success_rate: agent.counters.success_rate(),
            average_latency_ms: agent.counters.average_latency_ms(),
            error_count: agent.counters.error_count,
        }
    }
}

/// Everything a caller gets back from a mission, aborted or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionResult {
    pub mission_id: String,
    pub status: MissionStatus,
    pub final_phase: Phase,
    pub abort_reason: Option<AbortReason>,
    pub history: Vec<PhaseRecord>,
    pub assessment: ThreatAssessment,
    pub summary: MissionSummary,
    pub findings: Vec<Finding>,
    pub total_retries: u32,
    pub security_events: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub agents: Vec<AgentSnapshot>,
}

impl MissionResult {
    pub fn is_completed(&self) -> bool {
        self.final_phase == Phase::Completed
    }

    /// Phases in the order they were attempted, retries collapsed
    pub fn phases_visited(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = Vec::new();
        for record in &self.history {
            if phases.last() != Some(&record.phase) {
                phases.push(record.phase);
            }
        }
        phases
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
