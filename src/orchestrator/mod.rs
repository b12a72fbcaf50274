//! Mission orchestration module

pub mod events;
pub mod gate;
pub mod mission;
pub mod orchestrator;
pub mod result;
pub mod roster;
pub mod state;

// Re-export commonly used types
pub use events::{EventEmitter, MissionEvent};
pub use gate::{GateDecision, GateEvaluation};
pub use mission::{generate_mission_id, MissionParameters};
pub use orchestrator::MissionOrchestrator;
pub use result::{AgentSnapshot, Finding, MissionResult, MissionStatus, MissionSummary, PhaseSummary};
pub use roster::{default_specs, required_capability, OperationalStatus, Roster};
pub use state::{MissionState, PhaseOutcome, PhaseRecord};
