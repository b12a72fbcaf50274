//! Phaseline - Phased Multi-Agent Mission Orchestrator
//!
//! Runs a mission against a set of target endpoints:
//! - Five-phase state machine (INFIL, TARGET, ASSAULT, CONSOLIDATE, EXFIL) with retry gates
//! - Capability-typed agents running concurrently as tokio tasks
//! - Authenticated priority message bus between orchestrator and agents
//! - Intelligence fusion into per-target and mission threat levels
//!
//! # Example
//!
//! ```ignore
//! use phaseline::{Config, HttpProbe, MissionOrchestrator, MissionParameters};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let probe = Arc::new(HttpProbe::new(&config.probe)?);
//!     let orchestrator = MissionOrchestrator::new(config, probe)?;
//!     let params = MissionParameters::new("MSN-demo", vec!["https://staging.example.com".into()]);
//!     let result = orchestrator.execute_mission(params).await?;
//!     println!("{} at {}", result.status, result.final_phase);
//!     Ok(())
//! }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod bus;
pub mod intel;
pub mod agent;
pub mod orchestrator;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{AgentStatus, Intensity, MissionType, Phase, Priority, Squad, ThreatLevel};

pub use error::{AbortReason, AgentError, BusError, MissionError};

pub use config::Config;

pub use bus::{BusEndpoint, Message, MessageBus, Payload};

pub use intel::{IntelSource, IntelligenceFusion, IntelligenceReport, ThreatAssessment};

pub use agent::{AgentReport, AgentSpec, Capability, HttpProbe, TargetProbe};

pub use orchestrator::{
    MissionEvent,
    MissionOrchestrator,
    MissionParameters,
    MissionResult,
    MissionStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Phased Multi-Agent Mission Orchestrator", NAME, VERSION)
}
