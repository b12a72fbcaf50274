//! Closed set of agent roles
//!
//! Every role shares the same phase contract; what differs is which phases
//! it joins, how it samples the target and how it judges the samples.

use super::probe::ProbeSample;
use crate::intel::IntelSource;
use crate::types::{Intensity, Phase, Squad};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latency above which traffic counts as degraded
const SLOW_LATENCY_MS: f64 = 500.0;
/// Latency span over which degradation ramps from 0 to 1
const LATENCY_RAMP_MS: f64 = 2000.0;
/// Hard ceiling checked by resource management
const RESOURCE_CEILING_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Reconnaissance,
    StressTest,
    CoreValidation,
    PrecisionTest,
    TechnicalAnalysis,
    Recovery,
    ResourceManagement,
    InfrastructureAnalysis,
    StealthTest,
    Monitoring,
    ResilienceTest,
    Analytics,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::Reconnaissance,
        Capability::StressTest,
        Capability::CoreValidation,
        Capability::PrecisionTest,
        Capability::TechnicalAnalysis,
        Capability::Recovery,
        Capability::ResourceManagement,
        Capability::InfrastructureAnalysis,
        Capability::StealthTest,
        Capability::Monitoring,
        Capability::ResilienceTest,
        Capability::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reconnaissance => "reconnaissance",
            Capability::StressTest => "stress-test",
            Capability::CoreValidation => "core-validation",
            Capability::PrecisionTest => "precision-test",
            Capability::TechnicalAnalysis => "technical-analysis",
            Capability::Recovery => "recovery",
            Capability::ResourceManagement => "resource-management",
            Capability::InfrastructureAnalysis => "infrastructure-analysis",
            Capability::StealthTest => "stealth-test",
            Capability::Monitoring => "monitoring",
            Capability::ResilienceTest => "resilience-test",
            Capability::Analytics => "analytics",
        }
    }

    /// Parse a role name; accepts the kebab-case name or common short forms
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase().replace('_', "-");
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .or(match lower.as_str() {
                "recon" => Some(Capability::Reconnaissance),
                "stress" => Some(Capability::StressTest),
                "core" | "validation" => Some(Capability::CoreValidation),
                "precision" => Some(Capability::PrecisionTest),
                "technical" => Some(Capability::TechnicalAnalysis),
                "resource" | "resources" => Some(Capability::ResourceManagement),
                "infrastructure" | "infra" => Some(Capability::InfrastructureAnalysis),
                "stealth" => Some(Capability::StealthTest),
                "resilience" => Some(Capability::ResilienceTest),
                _ => None,
            })
    }

    /// Phases this role takes part in
    pub fn phases(&self) -> &'static [Phase] {
        match self {
            Capability::Reconnaissance => &[Phase::Infil, Phase::Target],
            Capability::StressTest => &[Phase::Assault],
            Capability::CoreValidation => &[Phase::Assault],
            Capability::PrecisionTest => &[Phase::Target, Phase::Assault],
            Capability::TechnicalAnalysis => &[Phase::Infil, Phase::Target],
            Capability::Recovery => &[Phase::Consolidate, Phase::Exfil],
            Capability::ResourceManagement => &[Phase::Assault, Phase::Consolidate],
            Capability::InfrastructureAnalysis => &[Phase::Infil, Phase::Target],
            Capability::StealthTest => &[Phase::Infil, Phase::Target, Phase::Assault],
            Capability::Monitoring => &[Phase::Infil, Phase::Consolidate, Phase::Exfil],
            Capability::ResilienceTest => &[Phase::Assault],
            Capability::Analytics => &[Phase::Target, Phase::Consolidate],
        }
    }

    pub fn participates_in(&self, phase: Phase) -> bool {
        self.phases().contains(&phase)
    }

    /// Squad a role is filed under when none is given
    pub fn default_squad(&self) -> Squad {
        match self {
            Capability::Reconnaissance | Capability::Analytics | Capability::ResourceManagement => Squad::Alpha,
            Capability::StressTest | Capability::CoreValidation | Capability::ResilienceTest => Squad::Bravo,
            Capability::PrecisionTest | Capability::TechnicalAnalysis | Capability::InfrastructureAnalysis => {
                Squad::Charlie
            }
            Capability::StealthTest | Capability::Monitoring | Capability::Recovery => Squad::Delta,
        }
    }

    /// Intelligence category this role's observations fall under
    pub fn intel_source(&self) -> IntelSource {
        match self {
            Capability::StressTest | Capability::StealthTest => IntelSource::AntiAutomation,
            Capability::Reconnaissance | Capability::TechnicalAnalysis => IntelSource::PassiveNetwork,
            Capability::InfrastructureAnalysis | Capability::PrecisionTest => IntelSource::TrafficPattern,
            Capability::Analytics => IntelSource::Behavioral,
            Capability::CoreValidation
            | Capability::ResourceManagement
            | Capability::Monitoring
            | Capability::ResilienceTest
            | Capability::Recovery => IntelSource::SystemHealth,
        }
    }

    /// Confidence attached to this role's intelligence
    pub fn base_confidence(&self) -> f64 {
        match self.intel_source() {
            IntelSource::AntiAutomation => 0.9,
            IntelSource::TrafficPattern => 0.8,
            IntelSource::SystemHealth => 0.8,
            IntelSource::PassiveNetwork => 0.7,
            IntelSource::Behavioral => 0.6,
        }
    }

    /// Probe samples per target for a phase at the given intensity
    pub fn samples_for(&self, phase: Phase, intensity: Intensity) -> usize {
        if matches!(phase, Phase::Infil | Phase::Exfil) {
            return 1;
        }
        let base = intensity.samples_per_target();
        if *self == Capability::StressTest {
            base * 4
        } else {
            base
        }
    }

    /// Whether samples against one target are fired together
    pub fn is_concurrent(&self) -> bool {
        *self == Capability::StressTest
    }

    /// Judge the samples collected against one target
    pub fn evaluate(&self, target: &str, samples: &[ProbeSample]) -> TargetOutcome {
        let stats = SampleStats::from_samples(samples);
        if stats.count == 0 {
            return TargetOutcome {
                passed: false,
                signal: 0.0,
                finding: Some(format!("{}: no samples collected", target)),
            };
        }

        let latency_pressure = ((stats.mean_latency_ms - SLOW_LATENCY_MS) / LATENCY_RAMP_MS).clamp(0.0, 1.0);

        let (passed, signal) = match self {
            Capability::StressTest => (stats.ok_ratio() >= 0.8, stats.blocked_ratio()),
            Capability::StealthTest => (stats.blocked == 0, stats.blocked_ratio()),
            Capability::Reconnaissance | Capability::TechnicalAnalysis => (
                stats.ok_ratio() >= 0.5,
                0.5 * stats.blocked_ratio() + 0.5 * (1.0 - stats.ok_ratio()),
            ),
            Capability::PrecisionTest => (
                stats.ok == stats.count && stats.consistent_status,
                stats.blocked_ratio().max(latency_pressure),
            ),
            Capability::InfrastructureAnalysis => {
                (stats.ok_ratio() >= 0.5, stats.blocked_ratio().max(latency_pressure))
            }
            Capability::CoreValidation => (
                stats.ok == stats.count && stats.min_bytes > 0,
                stats.server_error_ratio(),
            ),
            Capability::ResilienceTest => (stats.server_error_ratio() < 0.2, stats.server_error_ratio()),
            Capability::Recovery => (stats.last_ok, stats.server_error_ratio()),
            Capability::ResourceManagement => (
                stats.ok_ratio() >= 0.5 && stats.max_latency_ms <= RESOURCE_CEILING_MS,
                stats.server_error_ratio().max(latency_pressure),
            ),
            Capability::Monitoring => (
                stats.ok_ratio() >= 0.5,
                stats.server_error_ratio().max(1.0 - stats.ok_ratio()),
            ),
            Capability::Analytics => (stats.ok_ratio() >= 0.5, stats.jitter()),
        };

        let finding = if stats.blocked > 0 {
            Some(format!(
                "{}: {} of {} probes blocked by defensive measures",
                target, stats.blocked, stats.count
            ))
        } else if stats.server_errors > 0 {
            Some(format!(
                "{}: {} of {} probes returned server errors",
                target, stats.server_errors, stats.count
            ))
        } else if !passed {
            Some(format!("{}: {} objective not met", target, self))
        } else {
            None
        };

        TargetOutcome {
            passed,
            signal: signal.clamp(0.0, 1.0),
            finding,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one role against one target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub passed: bool,
    /// Risk indication in [0, 1] fed to fusion
    pub signal: f64,
    pub finding: Option<String>,
}

#[derive(Debug, Default)]
struct SampleStats {
    count: usize,
    ok: usize,
    blocked: usize,
    server_errors: usize,
    mean_latency_ms: f64,
    min_latency_ms: u64,
    max_latency_ms: u64,
    min_bytes: u64,
    consistent_status: bool,
    last_ok: bool,
}

impl SampleStats {
    fn from_samples(samples: &[ProbeSample]) -> Self {
        let Some(first) = samples.first() else {
            return Self::default();
        };
        let total: u64 = samples.iter().map(|s| s.latency_ms).sum();
        Self {
            count: samples.len(),
            ok: samples.iter().filter(|s| s.is_ok()).count(),
            blocked: samples.iter().filter(|s| s.blocked).count(),
            server_errors: samples.iter().filter(|s| s.status >= 500).count(),
            mean_latency_ms: total as f64 / samples.len() as f64,
            min_latency_ms: samples.iter().map(|s| s.latency_ms).min().unwrap_or(0),
            max_latency_ms: samples.iter().map(|s| s.latency_ms).max().unwrap_or(0),
            min_bytes: samples.iter().map(|s| s.bytes).min().unwrap_or(0),
            consistent_status: samples.iter().all(|s| s.status == first.status),
            last_ok: samples.last().map(ProbeSample::is_ok).unwrap_or(false),
        }
    }

    fn ok_ratio(&self) -> f64 {
        self.ok as f64 / self.count as f64
    }

    fn blocked_ratio(&self) -> f64 {
        self.blocked as f64 / self.count as f64
    }

    fn server_error_ratio(&self) -> f64 {
        self.server_errors as f64 / self.count as f64
    }

    /// Latency spread relative to the mean
    fn jitter(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let spread = (self.max_latency_ms - self.min_latency_ms) as f64;
        (spread / self.mean_latency_ms.max(1.0) / 2.0).clamp(0.0, 1.0)
    }
}
