//! Mission parameters

use crate::config::TimeoutConfig;
use crate::error::MissionError;
use crate::types::{Intensity, MissionType, ThreatLevel};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Immutable input of one mission run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionParameters {
    #[serde(default = "generate_mission_id")]
    pub mission_id: String,
    /// Ordered endpoints under test
    pub targets: Vec<String>,
    #[serde(default = "default_mission_type")]
    pub mission_type: MissionType,
    #[serde(default)]
    pub threat_level: ThreatLevel,
    #[serde(default)]
    pub intensity: Intensity,
    /// Overrides `timeouts.mission_timeout_ms` for this run
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
}

fn default_mission_type() -> MissionType {
    MissionType::SpecialRecon
}

/// Fresh mission id: `MSN-<utc timestamp>-<8 hex>`
pub fn generate_mission_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("MSN-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}

impl MissionParameters {
    pub fn new(mission_id: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            targets,
            mission_type: default_mission_type(),
            threat_level: ThreatLevel::Green,
            intensity: Intensity::default(),
            time_limit_ms: None,
        }
    }

    pub fn with_mission_type(mut self, mission_type: MissionType) -> Self {
        self.mission_type = mission_type;
        self
    }

    pub fn with_threat_level(mut self, level: ThreatLevel) -> Self {
        self.threat_level = level;
        self
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit_ms = Some(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Effective mission-wide limit
    pub fn mission_timeout(&self, timeouts: &TimeoutConfig) -> Duration {
        self.time_limit_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| timeouts.mission_timeout())
    }

    pub fn validate(&self) -> Result<(), MissionError> {
        let invalid = |msg: String| Err(MissionError::InvalidParameters(msg));

        if self.mission_id.trim().is_empty() {
            return invalid("mission id is empty".to_string());
        }
        if self.mission_id.chars().any(char::is_whitespace) {
            return invalid(format!("mission id '{}' contains whitespace", self.mission_id));
        }
        if self.targets.is_empty() {
            return invalid("target set is empty".to_string());
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            let parsed = url::Url::parse(target)
                .map_err(|e| MissionError::InvalidParameters(format!("target '{}' is not a URL: {}", target, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return invalid(format!("target '{}' must use http or https", target));
            }
            if parsed.host_str().is_none() {
                return invalid(format!("target '{}' has no host", target));
            }
            if !seen.insert(target.as_str()) {
                return invalid(format!("target '{}' is listed twice", target));
            }
        }

        if self.time_limit_ms == Some(0) {
            return invalid("time limit must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(targets: &[&str]) -> MissionParameters {
        MissionParameters::new("MSN-1", targets.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_valid_parameters() {
        assert!(params(&["https://shop.test/", "http://api.test/v1"]).validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_targets() {
        assert!(matches!(params(&[]).validate(), Err(MissionError::InvalidParameters(_))));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_schemes() {
        assert!(params(&["https://a.test/", "https://a.test/"]).validate().is_err());
        assert!(params(&["ftp://a.test/"]).validate().is_err());
        assert!(params(&["not a url"]).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_mission_id() {
        let mut p = params(&["https://a.test/"]);
        p.mission_id = "two words".to_string();
        assert!(p.validate().is_err());
        p.mission_id = " ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_time_limit() {
        let timeouts = TimeoutConfig::default();
        let p = params(&["https://a.test/"]);
        assert_eq!(p.mission_timeout(&timeouts), Duration::from_millis(1_800_000));
        let p = p.with_time_limit(Duration::from_secs(5));
        assert_eq!(p.mission_timeout(&timeouts), Duration::from_secs(5));
        let mut zero = params(&["https://a.test/"]);
        zero.time_limit_ms = Some(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_huge_time_limit_saturates() {
        let p = params(&["https://a.test/"]).with_time_limit(Duration::MAX);
        assert_eq!(p.time_limit_ms, Some(u64::MAX));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_generated_id_shape() {
        let id = generate_mission_id();
        assert!(id.starts_with("MSN-"));
        assert!(!id.contains(' '));
    }

    #[test]
    fn test_parse_from_toml_with_defaults() {
        let p: MissionParameters = toml::from_str("targets = [\"https://a.test/\"]\nintensity = \"STEALTH\"\n").unwrap();
        assert_eq!(p.intensity, Intensity::Stealth);
        assert_eq!(p.mission_type, MissionType::SpecialRecon);
        assert!(p.mission_id.starts_with("MSN-"));
    }
}
