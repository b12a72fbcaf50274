//! Intelligence reports and fusion into a threat assessment

pub mod fusion;
pub mod report;

pub use fusion::{assess, decay, FusionCycle, IntelligenceFusion};
pub use report::{IntelSource, IntelligenceReport, TargetRisk, ThreatAssessment};
