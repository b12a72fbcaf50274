//! Shared types used across modules
//!
//! The mission vocabulary (phases, threat levels, message priorities, roles of
//! the roster) lives here so the bus, agents, fusion and orchestrator can all
//! depend on it without depending on each other.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mission lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Infil,
    Target,
    Assault,
    Consolidate,
    Exfil,
    Completed,
    Aborted,
}

impl Phase {
    /// The five working phases in execution order
    pub const OPERATIONAL: [Phase; 5] = [
        Phase::Infil,
        Phase::Target,
        Phase::Assault,
        Phase::Consolidate,
        Phase::Exfil,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }

    /// Next phase on a successful gate. Terminal phases have no successor.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Infil => Some(Phase::Target),
            Phase::Target => Some(Phase::Assault),
            Phase::Assault => Some(Phase::Consolidate),
            Phase::Consolidate => Some(Phase::Exfil),
            Phase::Exfil => Some(Phase::Completed),
            Phase::Completed | Phase::Aborted => None,
        }
    }

    /// Whether the state machine may move from `self` to `to`.
    ///
    /// Allowed: staying in place (retry of the current phase), stepping to the
    /// next phase, or aborting from any non-terminal phase.
    pub fn can_transition(self, to: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == self || Some(to) == self.next() || to == Phase::Aborted
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Infil => "INFIL",
            Phase::Target => "TARGET",
            Phase::Assault => "ASSAULT",
            Phase::Consolidate => "CONSOLIDATE",
            Phase::Exfil => "EXFIL",
            Phase::Completed => "COMPLETED",
            Phase::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat level classification, ordered from calm to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    #[default]
    Green,
    Yellow,
    Orange,
    Red,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatLevel::Green => write!(f, "GREEN"),
            ThreatLevel::Yellow => write!(f, "YELLOW"),
            ThreatLevel::Orange => write!(f, "ORANGE"),
            ThreatLevel::Red => write!(f, "RED"),
        }
    }
}

/// Message precedence. Declared lowest first so the derived `Ord` gives
/// `Flash > Immediate > Priority > Routine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Routine,
    Priority,
    Immediate,
    Flash,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Routine => write!(f, "ROUTINE"),
            Priority::Priority => write!(f, "PRIORITY"),
            Priority::Immediate => write!(f, "IMMEDIATE"),
            Priority::Flash => write!(f, "FLASH"),
        }
    }
}

/// Kind of mission; decides the default roster and its required capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MissionType {
    /// Core functionality testing
    DirectAction,
    /// Intelligence gathering
    SpecialRecon,
    /// Adversarial testing
    UnconventionalWarfare,
    /// Defensive posture and resilience testing
    ForeignInternalDefense,
}

impl fmt::Display for MissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionType::DirectAction => write!(f, "DA"),
            MissionType::SpecialRecon => write!(f, "SR"),
            MissionType::UnconventionalWarfare => write!(f, "UW"),
            MissionType::ForeignInternalDefense => write!(f, "FID"),
        }
    }
}

/// How hard agents push on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intensity {
    /// Basic reconnaissance only
    Light,
    #[default]
    Moderate,
    /// Full spectrum testing
    Aggressive,
    /// Minimal footprint, paced requests
    Stealth,
}

impl Intensity {
    /// Probe samples per target in a working phase
    pub fn samples_per_target(self) -> usize {
        match self {
            Intensity::Light => 1,
            Intensity::Moderate => 3,
            Intensity::Aggressive => 6,
            Intensity::Stealth => 1,
        }
    }

    pub fn is_paced(self) -> bool {
        self == Intensity::Stealth
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intensity::Light => write!(f, "LIGHT"),
            Intensity::Moderate => write!(f, "MODERATE"),
            Intensity::Aggressive => write!(f, "AGGRESSIVE"),
            Intensity::Stealth => write!(f, "STEALTH"),
        }
    }
}

/// Squad membership. Organizational label only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Squad {
    Alpha,
    Bravo,
    Charlie,
    Delta,
}

impl Squad {
    pub const ALL: [Squad; 4] = [Squad::Alpha, Squad::Bravo, Squad::Charlie, Squad::Delta];
}

impl fmt::Display for Squad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Squad::Alpha => write!(f, "alpha"),
            Squad::Bravo => write!(f, "bravo"),
            Squad::Charlie => write!(f, "charlie"),
            Squad::Delta => write!(f, "delta"),
        }
    }
}

/// Runtime status of a roster entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Offline,
    Standby,
    Active,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Offline => write!(f, "OFFLINE"),
            AgentStatus::Standby => write!(f, "STANDBY"),
            AgentStatus::Active => write!(f, "ACTIVE"),
            AgentStatus::Error => write!(f, "ERROR"),
        }
    }
}
