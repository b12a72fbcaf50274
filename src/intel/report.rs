//! Intelligence reports and the threat assessment derived from them

use crate::types::ThreatLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Category of observation an intelligence report comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntelSource {
    /// Passive network and domain observation
    PassiveNetwork,
    TrafficPattern,
    /// Anti-automation and defensive measures
    AntiAutomation,
    Behavioral,
    SystemHealth,
}

impl IntelSource {
    /// Fixed order used wherever sources are combined
    pub const ALL: [IntelSource; 5] = [
        IntelSource::PassiveNetwork,
        IntelSource::TrafficPattern,
        IntelSource::AntiAutomation,
        IntelSource::Behavioral,
        IntelSource::SystemHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntelSource::PassiveNetwork => "passive_network",
            IntelSource::TrafficPattern => "traffic_pattern",
            IntelSource::AntiAutomation => "anti_automation",
            IntelSource::Behavioral => "behavioral",
            IntelSource::SystemHealth => "system_health",
        }
    }
}

impl fmt::Display for IntelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation about one target. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub id: Uuid,
    pub source: IntelSource,
    /// Agent (or other endpoint) that produced the report
    pub reporter: String,
    pub target: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Strength of the risk indication in [0, 1]; 0 means nothing unusual
    pub signal: f64,
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

impl IntelligenceReport {
    pub fn new(
        source: IntelSource,
        reporter: impl Into<String>,
        target: impl Into<String>,
        confidence: f64,
        signal: f64,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            reporter: reporter.into(),
            target: target.into(),
            confidence: confidence.clamp(0.0, 1.0),
            signal: signal.clamp(0.0, 1.0),
            summary: summary.into(),
            details: serde_json::Value::Null,
            observed_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Fused risk for a single target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRisk {
    pub score: f64,
    pub level: ThreatLevel,
    /// At or above the critical threshold
    pub red: bool,
    /// Strongest decayed evidence per source
    pub evidence: BTreeMap<IntelSource, f64>,
    pub reports: usize,
}

/// Unified risk picture recomputed each fusion cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub overall_level: ThreatLevel,
    pub overall_score: f64,
    pub targets: BTreeMap<String, TargetRisk>,
    pub red_targets: Vec<String>,
    /// Reports that contributed (above the confidence floor, not fully decayed)
    pub report_count: usize,
    pub assessed_at: DateTime<Utc>,
}

impl ThreatAssessment {
    /// Assessment with no intelligence yet
    pub fn baseline(level: ThreatLevel, at: DateTime<Utc>) -> Self {
        Self {
            overall_level: level,
            overall_score: 0.0,
            targets: BTreeMap::new(),
            red_targets: Vec::new(),
            report_count: 0,
            assessed_at: at,
        }
    }

    /// Targets sorted by descending risk, ties by name
    pub fn top_risks(&self, limit: usize) -> Vec<(String, f64)> {
        let mut risks: Vec<(String, f64)> = self
            .targets
            .iter()
            .filter(|(_, risk)| risk.score > 0.0)
            .map(|(target, risk)| (target.clone(), risk.score))
            .collect();
        risks.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        risks.truncate(limit);
        risks
    }
}
