//! Intelligence fusion
//!
//! `assess` is a pure function of the report set, the clock and the fusion
//! settings. `IntelligenceFusion` keeps the reports ingested so far, prunes
//! fully decayed ones and raises one FLASH alert per newly red target.

use super::report::{IntelSource, IntelligenceReport, TargetRisk, ThreatAssessment};
use crate::bus::{Alert, AlertKind, BusEndpoint, Payload, ORCHESTRATOR_ID};
use crate::config::FusionConfig;
use crate::types::{Phase, Priority, ThreatLevel};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, warn};

/// Weight of a report of the given age.
///
/// Full weight inside the window, halving every further window, zero once
/// older than `max_age_windows` windows.
pub fn decay(age_secs: f64, config: &FusionConfig) -> f64 {
    let window = config.window_secs as f64;
    let age = age_secs.max(0.0);
    if age <= window {
        1.0
    } else if age > window * f64::from(config.max_age_windows) {
        0.0
    } else {
        0.5f64.powf((age - window) / window)
    }
}

fn age_secs(report: &IntelligenceReport, now: DateTime<Utc>) -> f64 {
    (now - report.observed_at).num_milliseconds() as f64 / 1000.0
}

/// Fuse a report set into a threat assessment
pub fn assess(
    reports: &[IntelligenceReport],
    now: DateTime<Utc>,
    baseline: ThreatLevel,
    config: &FusionConfig,
) -> ThreatAssessment {
    // target -> source -> strongest evidence
    let mut evidence: BTreeMap<&str, BTreeMap<IntelSource, f64>> = BTreeMap::new();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut report_count = 0;

    for report in reports {
        if report.confidence < config.min_confidence {
            continue;
        }
        let weight = decay(age_secs(report, now), config);
        if weight == 0.0 {
            continue;
        }
        report_count += 1;
        *counts.entry(report.target.as_str()).or_default() += 1;
        let value = report.confidence * weight * report.signal;
        let slot = evidence
            .entry(report.target.as_str())
            .or_default()
            .entry(report.source)
            .or_insert(0.0);
        if value > *slot {
            *slot = value;
        }
    }

    let mut targets = BTreeMap::new();
    let mut red_targets = Vec::new();
    let mut overall_score: f64 = 0.0;

    for (target, by_source) in evidence {
        let mut calm = 1.0;
        for source in IntelSource::ALL {
            let e = by_source.get(&source).copied().unwrap_or(0.0);
            calm *= 1.0 - config.weights.weight(source) * e;
        }
        let score = (1.0 - calm).clamp(0.0, 1.0);
        let red = score >= config.critical_threshold;
        if red {
            red_targets.push(target.to_string());
        }
        overall_score = overall_score.max(score);
        targets.insert(
            target.to_string(),
            TargetRisk {
                score,
                level: config.level_for(score),
                red,
                evidence: by_source,
                reports: counts.get(target).copied().unwrap_or(0),
            },
        );
    }

    ThreatAssessment {
        overall_level: config.level_for(overall_score).max(baseline),
        overall_score,
        targets,
        red_targets,
        report_count,
        assessed_at: now,
    }
}

/// Result of one fusion cycle
#[derive(Debug, Clone)]
pub struct FusionCycle {
    pub assessment: ThreatAssessment,
    /// Targets that turned red in this cycle
    pub escalated: Vec<String>,
}

/// Stateful fusion engine owned by one mission run
pub struct IntelligenceFusion {
    config: FusionConfig,
    baseline: ThreatLevel,
    reports: Vec<IntelligenceReport>,
    escalated: BTreeSet<String>,
    latest: ThreatAssessment,
    endpoint: Option<BusEndpoint>,
}

impl IntelligenceFusion {
    pub fn new(config: FusionConfig, baseline: ThreatLevel) -> Self {
        Self {
            latest: ThreatAssessment::baseline(baseline, Utc::now()),
            config,
            baseline,
            reports: Vec::new(),
            escalated: BTreeSet::new(),
            endpoint: None,
        }
    }

    /// Send escalation alerts over the bus through this endpoint
    pub fn with_endpoint(mut self, endpoint: BusEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn ingest<I>(&mut self, reports: I)
    where
        I: IntoIterator<Item = IntelligenceReport>,
    {
        self.reports.extend(reports);
    }

    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    pub fn latest(&self) -> &ThreatAssessment {
        &self.latest
    }

    /// Recompute the assessment and alert on newly red targets
    pub async fn fuse(&mut self, now: DateTime<Utc>, phase: Phase) -> FusionCycle {
        let config = &self.config;
        self.reports
            .retain(|r| decay(age_secs(r, now), config) > 0.0);

        let assessment = assess(&self.reports, now, self.baseline, &self.config);
        let escalated: Vec<String> = assessment
            .red_targets
            .iter()
            .filter(|t| !self.escalated.contains(*t))
            .cloned()
            .collect();

        debug!(
            score = assessment.overall_score,
            level = %assessment.overall_level,
            reports = assessment.report_count,
            "Fusion cycle"
        );

        for target in &escalated {
            self.escalated.insert(target.clone());
            let score = assessment.targets.get(target).map(|r| r.score).unwrap_or(0.0);
            warn!(url = %target, score, phase = %phase, "Threat escalation: target marked red");
            self.alert(phase, target, score).await;
        }

        self.latest = assessment.clone();
        FusionCycle { assessment, escalated }
    }

    async fn alert(&self, phase: Phase, target: &str, score: f64) {
        let Some(endpoint) = &self.endpoint else { return };
        let alert = Alert {
            kind: AlertKind::ThreatEscalation,
            source: endpoint.id().to_string(),
            phase,
            detail: format!("risk {:.2} on {} crossed critical threshold", score, target),
            targets: vec![target.to_string()],
        };
        if let Err(e) = endpoint
            .send_with_backoff(ORCHESTRATOR_ID, Priority::Flash, Payload::Alert(alert))
            .await
        {
            error!(url = %target, "Failed to deliver escalation alert: {}", e);
        }
    }
}
