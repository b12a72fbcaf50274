//! Configuration management
//!
//! Per-scenario tunables for the orchestrator: phase-gate policy, timeouts,
//! agent retry budgets, bus capacity, fusion window and weights, probe
//! settings. Consumed once at orchestrator construction.

use crate::error::MissionError;
use crate::intel::IntelSource;
use crate::types::{Intensity, MissionType, Phase, ThreatLevel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Phase-advance gate policy
    #[serde(default)]
    pub gate: GateConfig,
    /// Phase and mission timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Agent retry and reporting cadence
    #[serde(default)]
    pub agents: AgentConfig,
    /// Message bus limits
    #[serde(default)]
    pub bus: BusConfig,
    /// Intelligence fusion window, weights and thresholds
    #[serde(default)]
    pub fusion: FusionConfig,
    /// HTTP probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Lifecycle event channel
    #[serde(default)]
    pub events: EventConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum fraction of SUCCESS/PARTIAL reports needed to advance
    #[serde(default = "default_success_ratio")]
    pub required_success_ratio: f64,
    /// Retries of a single phase before escalating to ABORTED
    #[serde(default = "default_phase_retries")]
    pub max_phase_retries: u32,
    /// Overall threat level at which the gate aborts
    #[serde(default = "default_abort_level")]
    pub abort_level: ThreatLevel,
    /// Abort the mission on any agent FLASH fault. When false the agent is
    /// retired and may be restored by a recovery-capable agent.
    #[serde(default = "default_true")]
    pub abort_on_agent_fault: bool,
}

fn default_success_ratio() -> f64 {
    0.8
}

fn default_phase_retries() -> u32 {
    2
}

fn default_abort_level() -> ThreatLevel {
    ThreatLevel::Red
}

fn default_true() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            required_success_ratio: default_success_ratio(),
            max_phase_retries: default_phase_retries(),
            abort_level: default_abort_level(),
            abort_on_agent_fault: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Default barrier timeout for a phase
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_ms: u64,
    /// Per-phase overrides of `phase_timeout_ms`
    #[serde(default)]
    pub phase_overrides_ms: BTreeMap<Phase, u64>,
    /// Mission-wide limit; forces ABORTED when exceeded
    #[serde(default = "default_mission_timeout")]
    pub mission_timeout_ms: u64,
    /// How long agents get to exit after the shutdown broadcast
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_phase_timeout() -> u64 {
    120_000
}

fn default_mission_timeout() -> u64 {
    1_800_000
}

fn default_shutdown_grace() -> u64 {
    2_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            phase_timeout_ms: default_phase_timeout(),
            phase_overrides_ms: BTreeMap::new(),
            mission_timeout_ms: default_mission_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl TimeoutConfig {
    pub fn phase_timeout(&self, phase: Phase) -> Duration {
        let ms = self
            .phase_overrides_ms
            .get(&phase)
            .copied()
            .unwrap_or(self.phase_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn mission_timeout(&self) -> Duration {
        Duration::from_millis(self.mission_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Retries of a transiently failing attempt before reporting FAILED
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Base backoff between agent retries (doubles each retry)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// SITREP cadence while a phase is executing
    #[serde(default = "default_sitrep_interval")]
    pub sitrep_interval_ms: u64,
    /// Delay between probes under STEALTH intensity
    #[serde(default = "default_stealth_spacing")]
    pub stealth_spacing_ms: u64,
}

fn default_retry_budget() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    200
}

fn default_sitrep_interval() -> u64 {
    30_000
}

fn default_stealth_spacing() -> u64 {
    250
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff(),
            sitrep_interval_ms: default_sitrep_interval(),
            stealth_spacing_ms: default_stealth_spacing(),
        }
    }
}

impl AgentConfig {
    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-recipient mailbox bound
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Send attempts after `QueueSaturated` before escalating
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    /// Base send backoff (doubles each attempt)
    #[serde(default = "default_send_backoff")]
    pub send_backoff_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_send_retries() -> u32 {
    3
}

fn default_send_backoff() -> u64 {
    25
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_retries: default_send_retries(),
            send_backoff_ms: default_send_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Reports younger than this carry full weight
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Reports older than this many windows are dropped entirely
    #[serde(default = "default_max_age_windows")]
    pub max_age_windows: u32,
    /// Reports below this confidence are ignored
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_yellow")]
    pub yellow_threshold: f64,
    #[serde(default = "default_orange")]
    pub orange_threshold: f64,
    /// Risk at or above this marks a target red and raises a FLASH alert
    #[serde(default = "default_critical")]
    pub critical_threshold: f64,
    #[serde(default)]
    pub weights: SourceWeights,
}

fn default_window_secs() -> u64 {
    300
}

fn default_max_age_windows() -> u32 {
    4
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_yellow() -> f64 {
    0.25
}

fn default_orange() -> f64 {
    0.5
}

fn default_critical() -> f64 {
    0.75
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_age_windows: default_max_age_windows(),
            min_confidence: default_min_confidence(),
            yellow_threshold: default_yellow(),
            orange_threshold: default_orange(),
            critical_threshold: default_critical(),
            weights: SourceWeights::default(),
        }
    }
}

impl FusionConfig {
    /// Map a risk score onto a threat level
    pub fn level_for(&self, score: f64) -> ThreatLevel {
        if score >= self.critical_threshold {
            ThreatLevel::Red
        } else if score >= self.orange_threshold {
            ThreatLevel::Orange
        } else if score >= self.yellow_threshold {
            ThreatLevel::Yellow
        } else {
            ThreatLevel::Green
        }
    }
}

/// How strongly each intelligence category pushes toward risk, in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceWeights {
    #[serde(default = "default_passive_weight")]
    pub passive_network: f64,
    #[serde(default = "default_traffic_weight")]
    pub traffic_pattern: f64,
    #[serde(default = "default_anti_automation_weight")]
    pub anti_automation: f64,
    #[serde(default = "default_behavioral_weight")]
    pub behavioral: f64,
    #[serde(default = "default_system_health_weight")]
    pub system_health: f64,
}

fn default_passive_weight() -> f64 {
    0.5
}

fn default_traffic_weight() -> f64 {
    0.7
}

fn default_anti_automation_weight() -> f64 {
    1.0
}

fn default_behavioral_weight() -> f64 {
    0.4
}

fn default_system_health_weight() -> f64 {
    0.6
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            passive_network: default_passive_weight(),
            traffic_pattern: default_traffic_weight(),
            anti_automation: default_anti_automation_weight(),
            behavioral: default_behavioral_weight(),
            system_health: default_system_health_weight(),
        }
    }
}

impl SourceWeights {
    pub fn weight(&self, source: IntelSource) -> f64 {
        match source {
            IntelSource::PassiveNetwork => self.passive_network,
            IntelSource::TrafficPattern => self.traffic_pattern,
            IntelSource::AntiAutomation => self.anti_automation,
            IntelSource::Behavioral => self.behavioral,
            IntelSource::SystemHealth => self.system_health,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Bytes of response body inspected for challenge markers
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    format!("phaseline/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_body() -> usize {
    64 * 1024
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            user_agent: default_user_agent(),
            max_body_bytes: default_max_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Lifecycle events buffered per subscriber before lagging
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), MissionError> {
        let invalid = |msg: String| Err(MissionError::InvalidConfig(msg));

        let ratio = self.gate.required_success_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return invalid(format!("gate.required_success_ratio must be in [0, 1], got {}", ratio));
        }
        if self.timeouts.phase_timeout_ms == 0 {
            return invalid("timeouts.phase_timeout_ms must be positive".to_string());
        }
        if let Some((phase, _)) = self.timeouts.phase_overrides_ms.iter().find(|(_, ms)| **ms == 0) {
            return invalid(format!("timeouts.phase_overrides_ms.{} must be positive", phase));
        }
        if self.timeouts.mission_timeout_ms == 0 {
            return invalid("timeouts.mission_timeout_ms must be positive".to_string());
        }
        if self.agents.sitrep_interval_ms == 0 {
            return invalid("agents.sitrep_interval_ms must be positive".to_string());
        }
        if self.bus.queue_capacity == 0 {
            return invalid("bus.queue_capacity must be positive".to_string());
        }
        if self.events.capacity == 0 {
            return invalid("events.capacity must be positive".to_string());
        }

        let fusion = &self.fusion;
        if fusion.window_secs == 0 || fusion.max_age_windows == 0 {
            return invalid("fusion window and max age must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&fusion.min_confidence) {
            return invalid(format!("fusion.min_confidence must be in [0, 1], got {}", fusion.min_confidence));
        }
        let ordered = 0.0 < fusion.yellow_threshold
            && fusion.yellow_threshold <= fusion.orange_threshold
            && fusion.orange_threshold <= fusion.critical_threshold
            && fusion.critical_threshold <= 1.0;
        if !ordered {
            return invalid("fusion thresholds must satisfy 0 < yellow <= orange <= critical <= 1".to_string());
        }
        for source in IntelSource::ALL {
            let weight = fusion.weights.weight(source);
            if !(0.0..=1.0).contains(&weight) {
                return invalid(format!("fusion weight for {} must be in [0, 1], got {}", source, weight));
            }
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "phaseline", "phaseline")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

/// A pre-configured mission profile
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub mission_type: MissionType,
    pub intensity: Intensity,
    pub required_success_ratio: f64,
    pub mission_timeout_ms: u64,
}

impl Scenario {
    /// Overlay the scenario's gate and timeout settings onto a config
    pub fn apply(&self, config: &mut Config) {
        config.gate.required_success_ratio = self.required_success_ratio;
        config.timeouts.mission_timeout_ms = self.mission_timeout_ms;
    }
}

const MINUTE_MS: u64 = 60_000;

static SCENARIOS: [Scenario; 6] = [
    Scenario {
        name: "ecommerce_recon",
        description: "Comprehensive reconnaissance of e-commerce catalogs",
        mission_type: MissionType::SpecialRecon,
        intensity: Intensity::Moderate,
        required_success_ratio: 0.85,
        mission_timeout_ms: 20 * MINUTE_MS,
    },
    Scenario {
        name: "full_spectrum_aggressive",
        description: "Complete adversarial suite with maximum coverage",
        mission_type: MissionType::UnconventionalWarfare,
        intensity: Intensity::Aggressive,
        required_success_ratio: 0.75,
        mission_timeout_ms: 60 * MINUTE_MS,
    },
    Scenario {
        name: "stealth_recon",
        description: "Paced, low-footprint reconnaissance",
        mission_type: MissionType::SpecialRecon,
        intensity: Intensity::Stealth,
        required_success_ratio: 0.9,
        mission_timeout_ms: 30 * MINUTE_MS,
    },
    Scenario {
        name: "api_endpoint",
        description: "Functional validation of API endpoints",
        mission_type: MissionType::DirectAction,
        intensity: Intensity::Moderate,
        required_success_ratio: 0.9,
        mission_timeout_ms: 15 * MINUTE_MS,
    },
    Scenario {
        name: "news_media",
        description: "Light-touch checks against news and media sites",
        mission_type: MissionType::SpecialRecon,
        intensity: Intensity::Light,
        required_success_ratio: 0.9,
        mission_timeout_ms: 10 * MINUTE_MS,
    },
    Scenario {
        name: "marketplace",
        description: "Listing and seller page validation for marketplaces",
        mission_type: MissionType::DirectAction,
        intensity: Intensity::Moderate,
        required_success_ratio: 0.85,
        mission_timeout_ms: 25 * MINUTE_MS,
    },
];

pub fn scenarios() -> &'static [Scenario] {
    &SCENARIOS
}

pub fn scenario(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_ratio() {
        let mut config = Config::default();
        config.gate.required_success_ratio = 1.5;
        assert!(matches!(config.validate(), Err(MissionError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let mut config = Config::default();
        config.fusion.orange_threshold = 0.9;
        config.fusion.critical_threshold = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_phase_override() {
        let mut config = Config::default();
        config.timeouts.phase_overrides_ms.insert(Phase::Assault, 500);
        assert_eq!(config.timeouts.phase_timeout(Phase::Assault), Duration::from_millis(500));
        assert_eq!(config.timeouts.phase_timeout(Phase::Infil), Duration::from_millis(120_000));
    }

    #[test]
    fn test_level_for_score() {
        let fusion = FusionConfig::default();
        assert_eq!(fusion.level_for(0.1), ThreatLevel::Green);
        assert_eq!(fusion.level_for(0.3), ThreatLevel::Yellow);
        assert_eq!(fusion.level_for(0.6), ThreatLevel::Orange);
        assert_eq!(fusion.level_for(0.75), ThreatLevel::Red);
    }

    #[test]
    fn test_agent_backoff_doubles() {
        let agents = AgentConfig::default();
        assert_eq!(agents.backoff(1), Duration::from_millis(200));
        assert_eq!(agents.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_scenario_apply() {
        let mut config = Config::default();
        let preset = scenario("stealth_recon").expect("preset exists");
        preset.apply(&mut config);
        assert_eq!(config.gate.required_success_ratio, 0.9);
        assert_eq!(config.timeouts.mission_timeout_ms, 30 * MINUTE_MS);
        assert!(scenario("nope").is_none());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[gate]\nrequired_success_ratio = 0.6\n\n[timeouts.phase_overrides_ms]\nASSAULT = 900\n",
        )
        .expect("write config");

        let config = Config::load_from(&path).expect("load config");
        assert_eq!(config.gate.required_success_ratio, 0.6);
        assert_eq!(config.gate.max_phase_retries, 2);
        assert_eq!(config.timeouts.phase_timeout(Phase::Assault), Duration::from_millis(900));
        assert_eq!(config.bus.queue_capacity, 256);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.fusion.weights.behavioral = 0.2;
        config.save_to(&path).expect("save");
        let loaded = Config::load_from(&path).expect("load");
        assert_eq!(loaded.fusion.weights.behavioral, 0.2);
    }
}
