//! Agent roster
//!
//! The orchestrator's registry of agents for one mission. Only the
//! orchestrator mutates it; agents never see it.

use crate::agent::{create_agent_spec, Agent, AgentReport, AgentSpec, Capability};
use crate::error::MissionError;
use crate::types::{AgentStatus, MissionType, Phase, Squad};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Capability a mission type cannot run without
pub fn required_capability(mission_type: MissionType) -> Capability {
    match mission_type {
        MissionType::DirectAction => Capability::CoreValidation,
        MissionType::SpecialRecon => Capability::Reconnaissance,
        MissionType::UnconventionalWarfare => Capability::StealthTest,
        MissionType::ForeignInternalDefense => Capability::ResilienceTest,
    }
}

/// Default five-agent team for a mission type
pub fn default_specs(mission_type: MissionType) -> Vec<AgentSpec> {
    let capabilities = match mission_type {
        MissionType::DirectAction => [
            Capability::Reconnaissance,
            Capability::CoreValidation,
            Capability::StressTest,
            Capability::Recovery,
            Capability::Monitoring,
        ],
        MissionType::SpecialRecon => [
            Capability::Reconnaissance,
            Capability::TechnicalAnalysis,
            Capability::InfrastructureAnalysis,
            Capability::Analytics,
            Capability::Monitoring,
        ],
        MissionType::UnconventionalWarfare => [
            Capability::Reconnaissance,
            Capability::StealthTest,
            Capability::StressTest,
            Capability::PrecisionTest,
            Capability::Monitoring,
        ],
        MissionType::ForeignInternalDefense => [
            Capability::Reconnaissance,
            Capability::ResilienceTest,
            Capability::ResourceManagement,
            Capability::Recovery,
            Capability::Monitoring,
        ],
    };
    capabilities.into_iter().map(|c| create_agent_spec(c, 1)).collect()
}

/// Check a roster before a mission starts
pub fn validate_specs(specs: &[AgentSpec], mission_type: MissionType) -> Result<(), MissionError> {
    if specs.is_empty() {
        return Err(MissionError::InvalidRoster("roster is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.id.trim().is_empty() {
            return Err(MissionError::InvalidRoster("agent id is empty".to_string()));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(MissionError::InvalidRoster(format!("agent id '{}' is used twice", spec.id)));
        }
    }
    let required = required_capability(mission_type);
    if !specs.iter().any(|s| s.capability == required) {
        return Err(MissionError::InvalidRoster(format!(
            "{} mission requires a {} agent",
            mission_type, required
        )));
    }
    Ok(())
}

/// Operational status snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalStatus {
    pub total: usize,
    pub offline: usize,
    pub standby: usize,
    pub active: usize,
    pub error: usize,
    pub by_squad: BTreeMap<Squad, usize>,
}

impl OperationalStatus {
    /// Agents able to take a directive
    pub fn operational(&self) -> usize {
        self.standby + self.active
    }
}

pub struct Roster {
    agents: Vec<Agent>,
}

impl Roster {
    pub fn from_specs(specs: &[AgentSpec], mission_type: MissionType) -> Result<Self, MissionError> {
        validate_specs(specs, mission_type)?;
        Ok(Self {
            agents: specs.iter().map(Agent::from_spec).collect(),
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }

    pub fn specs(&self) -> Vec<AgentSpec> {
        self.agents
            .iter()
            .map(|a| AgentSpec {
                id: a.id.clone(),
                capability: a.capability,
                squad: a.squad,
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    /// Bring every non-errored agent to STANDBY
    pub fn activate_all(&mut self) {
        for agent in &mut self.agents {
            if agent.status != AgentStatus::Error {
                agent.status = AgentStatus::Standby;
            }
        }
    }

    /// Agents relevant to a phase, in roster order. ERROR and OFFLINE excluded.
    pub fn select_for_phase(&self, phase: Phase) -> Vec<&Agent> {
        self.agents
            .iter()
            .filter(|a| a.is_available() && a.capability.participates_in(phase))
            .collect()
    }

    pub fn mark_tasked(&mut self, ids: &[String], task: &str) {
        for id in ids {
            if let Some(agent) = self.get_mut(id) {
                agent.status = AgentStatus::Active;
                agent.current_task = Some(task.to_string());
            }
        }
    }

    /// Fold a report into the agent's counters and stand it down
    pub fn record_report(&mut self, report: &AgentReport) {
        if let Some(agent) = self.get_mut(&report.agent_id) {
            agent.counters.record(report);
            if agent.status == AgentStatus::Active {
                agent.status = AgentStatus::Standby;
            }
            agent.current_task = None;
        }
    }

    /// Remove an agent from selection after an unrecoverable fault
    pub fn mark_error(&mut self, id: &str) {
        if let Some(agent) = self.get_mut(id) {
            warn!(agent_id = id, "Agent marked ERROR and removed from active roster");
            agent.status = AgentStatus::Error;
            agent.current_task = None;
        }
    }

    /// Whether a recovery-capable agent is available to restore others
    pub fn has_recovery(&self) -> bool {
        self.agents
            .iter()
            .any(|a| a.is_available() && a.capability == Capability::Recovery)
    }

    /// Restore ERROR agents to STANDBY if a recovery agent is available.
    /// Returns the restored ids.
    pub fn restore_errored(&mut self) -> Vec<String> {
        if !self.has_recovery() {
            return Vec::new();
        }
        let mut restored = Vec::new();
        for agent in &mut self.agents {
            if agent.status == AgentStatus::Error {
                agent.status = AgentStatus::Standby;
                restored.push(agent.id.clone());
            }
        }
        if !restored.is_empty() {
            info!(restored = ?restored, "Recovery restored errored agents");
        }
        restored
    }

    /// Take everyone offline at mission end
    pub fn retire_all(&mut self) {
        for agent in &mut self.agents {
            agent.status = AgentStatus::Offline;
            agent.current_task = None;
        }
    }

    pub fn status(&self) -> OperationalStatus {
        let mut status = OperationalStatus {
            total: self.agents.len(),
            ..Default::default()
        };
        for agent in &self.agents {
            match agent.status {
                AgentStatus::Offline => status.offline += 1,
                AgentStatus::Standby => status.standby += 1,
                AgentStatus::Active => status.active += 1,
                AgentStatus::Error => status.error += 1,
            }
            *status.by_squad.entry(agent.squad).or_default() += 1;
        }
        status
    }
}
