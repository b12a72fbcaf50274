//! Agents: roster entries, phase directives and reports
//!
//! An agent is a capability variant running as its own task. It only talks
//! to the rest of the mission over the bus: directives in, SITREPs, reports
//! and alerts out.

pub mod capability;
pub mod probe;
pub mod runner;
pub mod spawner;

pub use capability::{Capability, TargetOutcome};
pub use probe::{HttpProbe, ProbeError, ProbeRequest, ProbeSample, TargetProbe};
pub use runner::AgentWorker;
pub use spawner::AgentSpawner;

use crate::intel::IntelligenceReport;
use crate::types::{AgentStatus, Intensity, Phase, Squad};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an agent to put on the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub capability: Capability,
    pub squad: Squad,
}

pub fn create_agent_spec(capability: Capability, index: usize) -> AgentSpec {
    AgentSpec {
        id: format!("{}-{}", capability, index),
        capability,
        squad: capability.default_squad(),
    }
}

/// Work order for one attempt of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDirective {
    pub mission_id: String,
    pub phase: Phase,
    /// 0 for the first run of a phase, incremented on each retry
    pub attempt: u32,
    /// Subset of the mission target set
    pub targets: Vec<String>,
    pub intensity: Intensity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Success,
    Partial,
    Failed,
}

/// Why a report is FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Target kept timing out or was unreachable through the retry budget
    Transient,
    /// Agent never reported before the phase barrier expired
    PhaseTimeout,
    Fatal,
    /// Directive was malformed or named targets outside the mission
    Rejected,
    /// Probes ran but no target met the objective
    ObjectiveUnmet,
}

impl FailureKind {
    /// Failures a retry of the phase may clear
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::PhaseTimeout)
    }
}

/// Counters accumulated over one phase execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub probes: u32,
    pub successes: u32,
    pub errors: u32,
    pub blocked: u32,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl MetricsDelta {
    pub fn record_sample(&mut self, sample: &ProbeSample) {
        self.probes += 1;
        if sample.is_ok() {
            self.successes += 1;
        }
        if sample.blocked {
            self.blocked += 1;
        }
        self.total_latency_ms += sample.latency_ms;
        self.max_latency_ms = self.max_latency_ms.max(sample.latency_ms);
    }

    pub fn record_error(&mut self) {
        self.probes += 1;
        self.errors += 1;
    }

    pub fn merge(&mut self, other: &MetricsDelta) {
        self.probes += other.probes;
        self.successes += other.successes;
        self.errors += other.errors;
        self.blocked += other.blocked;
        self.total_latency_ms += other.total_latency_ms;
        self.max_latency_ms = self.max_latency_ms.max(other.max_latency_ms);
    }

    /// Mean latency over samples that produced a response
    pub fn avg_latency_ms(&self) -> f64 {
        let answered = self.probes.saturating_sub(self.errors);
        if answered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / f64::from(answered)
        }
    }
}

/// Outcome of one agent's attempt at one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub capability: Capability,
    pub phase: Phase,
    pub attempt: u32,
    pub status: ReportStatus,
    pub failure: Option<FailureKind>,
    pub metrics: MetricsDelta,
    pub intel: Vec<IntelligenceReport>,
    pub findings: Vec<String>,
    /// Agent-level retries spent inside this attempt
    pub retries_used: u32,
    pub completed_at: DateTime<Utc>,
}

impl AgentReport {
    pub fn failed(
        agent_id: impl Into<String>,
        capability: Capability,
        phase: Phase,
        attempt: u32,
        kind: FailureKind,
        finding: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            capability,
            phase,
            attempt,
            status: ReportStatus::Failed,
            failure: Some(kind),
            metrics: MetricsDelta::default(),
            intel: Vec::new(),
            findings: vec![finding.into()],
            retries_used: 0,
            completed_at: Utc::now(),
        }
    }

    /// Stand-in for an agent that missed the phase barrier
    pub fn timed_out(agent_id: &str, capability: Capability, phase: Phase, attempt: u32) -> Self {
        Self::failed(
            agent_id,
            capability,
            phase,
            attempt,
            FailureKind::PhaseTimeout,
            format!("{} did not report before the {} barrier expired", agent_id, phase),
        )
    }

    /// SUCCESS or PARTIAL
    pub fn is_passing(&self) -> bool {
        self.status != ReportStatus::Failed
    }

    pub fn is_transient_failure(&self) -> bool {
        self.status == ReportStatus::Failed && self.failure.map(FailureKind::is_transient).unwrap_or(false)
    }
}

/// Rolling performance counters kept on the roster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCounters {
    pub reports: u32,
    pub passing_reports: u32,
    pub probes: u32,
    pub probe_successes: u32,
    pub error_count: u32,
    pub total_latency_ms: u64,
    answered: u32,
}

impl PerformanceCounters {
    pub fn record(&mut self, report: &AgentReport) {
        self.reports += 1;
        if report.is_passing() {
            self.passing_reports += 1;
        }
        self.probes += report.metrics.probes;
        self.probe_successes += report.metrics.successes;
        self.error_count += report.metrics.errors;
        if report.status == ReportStatus::Failed && report.metrics.errors == 0 {
            self.error_count += 1;
        }
        self.total_latency_ms += report.metrics.total_latency_ms;
        self.answered += report.metrics.probes.saturating_sub(report.metrics.errors);
    }

    /// Fraction of SUCCESS/PARTIAL reports
    pub fn success_rate(&self) -> f64 {
        if self.reports == 0 {
            0.0
        } else {
            f64::from(self.passing_reports) / f64::from(self.reports)
        }
    }

    pub fn average_latency_ms(&self) -> f64 {
        if self.answered == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / f64::from(self.answered)
        }
    }
}

/// Roster entry. Mutated only by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub squad: Squad,
    pub capability: Capability,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub counters: PerformanceCounters,
}

impl Agent {
    pub fn from_spec(spec: &AgentSpec) -> Self {
        Self {
            id: spec.id.clone(),
            squad: spec.squad,
            capability: spec.capability,
            status: AgentStatus::Offline,
            current_task: None,
            counters: PerformanceCounters::default(),
        }
    }

    /// Eligible for phase selection
    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Standby | AgentStatus::Active)
    }
}
