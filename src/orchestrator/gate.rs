//! Phase-advance gate
//!
//! Pure and order-independent: the decision depends only on counts over the
//! report set, the threat level and the retries already spent.

use crate::agent::AgentReport;
use crate::config::GateConfig;
use crate::error::AbortReason;
use crate::intel::ThreatAssessment;
use crate::types::Phase;
use serde::{Deserialize, Serialize};

const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Advance,
    Retry,
    Abort { reason: AbortReason },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub decision: GateDecision,
    pub success_ratio: f64,
    pub passing: usize,
    pub expected: usize,
    pub transient_failures: usize,
    pub hard_failures: usize,
}

/// Evaluate a phase attempt. `reports` holds exactly one report per
/// selected agent, synthesized timeouts included.
pub fn evaluate(
    phase: Phase,
    reports: &[AgentReport],
    assessment: &ThreatAssessment,
    retries_used: u32,
    config: &GateConfig,
) -> GateEvaluation {
    let expected = reports.len();
    let passing = reports.iter().filter(|r| r.is_passing()).count();
    let transient_failures = reports.iter().filter(|r| r.is_transient_failure()).count();
    let hard_failures = expected - passing - transient_failures;
    let success_ratio = if expected == 0 {
        1.0
    } else {
        passing as f64 / expected as f64
    };
    let needed = config.required_success_ratio * expected as f64 - RATIO_EPSILON;

    let decision = if assessment.overall_level >= config.abort_level {
        let mut targets: Vec<String> = assessment
            .targets
            .iter()
            .filter(|(_, risk)| risk.red || risk.level >= config.abort_level)
            .map(|(target, _)| target.clone())
            .collect();
        targets.sort();
        GateDecision::Abort {
            reason: AbortReason::ThreatEscalation {
                phase,
                targets,
                score: assessment.overall_score,
            },
        }
    } else if passing as f64 >= needed {
        GateDecision::Advance
    } else if (passing + transient_failures) as f64 >= needed {
        if retries_used < config.max_phase_retries {
            GateDecision::Retry
        } else {
            GateDecision::Abort {
                reason: AbortReason::RetriesExhausted {
                    phase,
                    retries: retries_used,
                },
            }
        }
    } else {
        GateDecision::Abort {
            reason: AbortReason::GateFailed {
                phase,
                success_ratio,
                required: config.required_success_ratio,
            },
        }
    };

    GateEvaluation {
        decision,
        success_ratio,
        passing,
        expected,
        transient_failures,
        hard_failures,
    }
}
