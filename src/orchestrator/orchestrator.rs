//! Mission Orchestrator
//!
//! Drives one mission through INFIL, TARGET, ASSAULT, CONSOLIDATE and EXFIL.
//! Each run owns its own bus, roster, fusion engine and agent tasks, so
//! missions started from the same orchestrator stay isolated. The run loop
//! is the only writer of mission state and decides every gate serially.

use super::events::{EventEmitter, MissionEvent};
use super::gate::{self, GateDecision};
use super::mission::MissionParameters;
use super::result::{collect_findings, AgentSnapshot, MissionResult, MissionStatus, MissionSummary};
use super::roster::{default_specs, Roster};
use super::state::{MissionState, PhaseOutcome};
use crate::agent::{AgentReport, AgentSpawner, AgentSpec, Capability, FailureKind, PhaseDirective, TargetProbe};
use crate::bus::{AlertKind, BusEndpoint, Message, MessageBus, Payload, FUSION_ID, ORCHESTRATOR_ID};
use crate::config::Config;
use crate::error::{AbortReason, BusError, MissionError};
use crate::intel::IntelligenceFusion;
use crate::types::{AgentStatus, Phase, Priority};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Entry point for running missions
pub struct MissionOrchestrator {
    config: Config,
    probe: Arc<dyn TargetProbe>,
    roster: Option<Vec<AgentSpec>>,
    events: EventEmitter,
}

impl MissionOrchestrator {
    pub fn new(config: Config, probe: Arc<dyn TargetProbe>) -> Result<Self, MissionError> {
        config.validate()?;
        let events = EventEmitter::with_capacity(config.events.capacity);
        Ok(Self {
            config,
            probe,
            roster: None,
            events,
        })
    }

    /// Use an explicit roster instead of the mission type's default team
    pub fn with_roster(mut self, specs: Vec<AgentSpec>) -> Self {
        self.roster = Some(specs);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lifecycle events of every mission started after this call
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.events.subscribe()
    }

    pub async fn execute_mission(&self, params: MissionParameters) -> Result<MissionResult, MissionError> {
        self.execute_mission_with_cancel(params, CancellationToken::new()).await
    }

    /// Run a mission to a terminal state. Only invalid parameters or roster
    /// fail; everything after launch ends in a `MissionResult`.
    pub async fn execute_mission_with_cancel(
        &self,
        params: MissionParameters,
        cancel: CancellationToken,
    ) -> Result<MissionResult, MissionError> {
        params.validate()?;
        let specs = self
            .roster
            .clone()
            .unwrap_or_else(|| default_specs(params.mission_type));
        let roster = Roster::from_specs(&specs, params.mission_type)?;

        let run = MissionRun::launch(self, &params, roster, cancel.child_token()).await;
        Ok(run.execute().await)
    }
}

enum PhaseStep {
    Advance,
    Retry,
    Abort(AbortReason),
}

/// State of one mission run
struct MissionRun<'a> {
    config: &'a Config,
    params: &'a MissionParameters,
    events: &'a EventEmitter,
    bus: Arc<MessageBus>,
    endpoint: BusEndpoint,
    fusion: IntelligenceFusion,
    roster: Roster,
    state: MissionState,
    spawner: AgentSpawner,
    cancel: CancellationToken,
    deadline: Instant,
    summary: Option<MissionSummary>,
    security_seen: usize,
}

impl<'a> MissionRun<'a> {
    async fn launch(
        orchestrator: &'a MissionOrchestrator,
        params: &'a MissionParameters,
        mut roster: Roster,
        cancel: CancellationToken,
    ) -> MissionRun<'a> {
        let config = &orchestrator.config;
        let deadline = Instant::now() + params.mission_timeout(&config.timeouts);

        let bus = MessageBus::new(config.bus.clone());
        let endpoint = bus.endpoint(ORCHESTRATOR_ID).await;
        let fusion = IntelligenceFusion::new(config.fusion.clone(), params.threat_level)
            .with_endpoint(bus.endpoint(FUSION_ID).await);

        let mut spawner = AgentSpawner::new(
            Arc::clone(&bus),
            Arc::clone(&orchestrator.probe),
            config.agents.clone(),
            params.targets.clone(),
            cancel.clone(),
        );
        let agents = spawner.spawn_batch(roster.specs()).await;
        roster.activate_all();

        info!(
            mission_id = %params.mission_id,
            mission_type = %params.mission_type,
            intensity = %params.intensity,
            targets = params.targets.len(),
            agents = agents.len(),
            "Mission started"
        );
        orchestrator.events.emit(MissionEvent::MissionStarted {
            mission_id: params.mission_id.clone(),
            agents,
            at: Utc::now(),
        });

        MissionRun {
            config,
            params,
            events: &orchestrator.events,
            bus,
            endpoint,
            fusion,
            roster,
            state: MissionState::new(params.mission_id.clone()),
            spawner,
            cancel,
            deadline,
            summary: None,
            security_seen: 0,
        }
    }

    fn mission_id(&self) -> &str {
        &self.params.mission_id
    }

    async fn execute(mut self) -> MissionResult {
        let mut abort_reason = None;

        while !self.state.phase().is_terminal() {
            let phase = self.state.phase();
            match self.run_phase(phase).await {
                PhaseStep::Advance => {
                    if phase == Phase::Consolidate {
                        self.summary = Some(MissionSummary::build(self.state.history(), self.fusion.latest()));
                    }
                    let next = phase.next().unwrap_or(Phase::Completed);
                    self.state.transition(next);
                }
                PhaseStep::Retry => {
                    self.state.transition(phase);
                }
                PhaseStep::Abort(reason) => {
                    error!(mission_id = %self.mission_id(), phase = %phase, "Mission aborted: {}", reason);
                    abort_reason = Some(reason);
                    self.state.transition(Phase::Aborted);
                }
            }
        }

        self.finish(abort_reason).await
    }

    fn check_limits(&self, phase: Phase) -> Option<AbortReason> {
        if self.cancel.is_cancelled() {
            return Some(AbortReason::Cancelled { phase });
        }
        if Instant::now() >= self.deadline {
            return Some(AbortReason::MissionTimeout { phase });
        }
        None
    }

    async fn run_phase(&mut self, phase: Phase) -> PhaseStep {
        if let Some(reason) = self.check_limits(phase) {
            return PhaseStep::Abort(reason);
        }

        if !self.config.gate.abort_on_agent_fault {
            self.roster.restore_errored();
        }

        let selected: Vec<String> = self
            .roster
            .select_for_phase(phase)
            .iter()
            .map(|a| a.id.clone())
            .collect();
        let attempt = self.state.begin_attempt(selected.clone());

        info!(
            mission_id = %self.mission_id(),
            phase = %phase,
            attempt,
            agents = selected.len(),
            "Entering phase"
        );
        self.events.emit(MissionEvent::PhaseEntered {
            mission_id: self.mission_id().to_string(),
            phase,
            attempt,
            agents: selected.clone(),
        });

        self.roster.mark_tasked(&selected, &format!("{} attempt {}", phase, attempt));
        self.dispatch(phase, attempt, &selected).await;

        if let Some(reason) = self.barrier(phase).await {
            self.state.close_attempt(PhaseOutcome::Aborted, None);
            return PhaseStep::Abort(reason);
        }
        if let Some(reason) = self.drain(phase).await {
            self.state.close_attempt(PhaseOutcome::Aborted, None);
            return PhaseStep::Abort(reason);
        }

        self.fill_timeouts();
        self.fusion.fuse(Utc::now(), phase).await;
        self.flush_security_events().await;

        let reports = self
            .state
            .active_record()
            .map(|r| r.reports.clone())
            .unwrap_or_default();
        let evaluation = gate::evaluate(
            phase,
            &reports,
            self.fusion.latest(),
            self.state.retries_for(phase),
            &self.config.gate,
        );

        info!(
            mission_id = %self.mission_id(),
            phase = %phase,
            attempt,
            passing = evaluation.passing,
            expected = evaluation.expected,
            transient = evaluation.transient_failures,
            ratio = evaluation.success_ratio,
            threat = %self.fusion.latest().overall_level,
            "Phase gate evaluated"
        );
        self.events.emit(MissionEvent::PhaseCompleted {
            mission_id: self.mission_id().to_string(),
            phase,
            attempt,
            success_ratio: evaluation.success_ratio,
            threat_level: self.fusion.latest().overall_level,
            reports: reports.iter().map(|r| (r.agent_id.clone(), r.status)).collect(),
        });

        match evaluation.decision {
            GateDecision::Advance => {
                self.state.close_attempt(PhaseOutcome::Advanced, Some(evaluation.success_ratio));
                PhaseStep::Advance
            }
            GateDecision::Retry => {
                self.state.close_attempt(PhaseOutcome::Retried, Some(evaluation.success_ratio));
                let reason = format!(
                    "{} of {} passing, {} transient failures",
                    evaluation.passing, evaluation.expected, evaluation.transient_failures
                );
                warn!(mission_id = %self.mission_id(), phase = %phase, attempt, "Retrying phase: {}", reason);
                self.events.emit(MissionEvent::PhaseRetried {
                    mission_id: self.mission_id().to_string(),
                    phase,
                    attempt: attempt + 1,
                    reason,
                });
                PhaseStep::Retry
            }
            GateDecision::Abort { reason } => {
                self.state.close_attempt(PhaseOutcome::Aborted, Some(evaluation.success_ratio));
                PhaseStep::Abort(reason)
            }
        }
    }

    async fn dispatch(&mut self, phase: Phase, attempt: u32, selected: &[String]) {
        let directive = PhaseDirective {
            mission_id: self.mission_id().to_string(),
            phase,
            attempt,
            targets: self.params.targets.clone(),
            intensity: self.params.intensity,
        };
        for agent_id in selected {
            if let Err(e) = self
                .endpoint
                .send_with_backoff(agent_id, Priority::Immediate, Payload::Directive(directive.clone()))
                .await
            {
                // The agent will be counted as timed out at the barrier
                warn!(agent_id = %agent_id, phase = %phase, "Directive not delivered: {}", e);
            }
        }
    }

    /// Wait for every selected agent to report, the phase timeout, the
    /// mission deadline or cancellation
    async fn barrier(&mut self, phase: Phase) -> Option<AbortReason> {
        let phase_deadline = Instant::now() + self.config.timeouts.phase_timeout(phase);

        while !self.state.all_reported() {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(AbortReason::Cancelled { phase }),
                _ = tokio::time::sleep_until(self.deadline) => return Some(AbortReason::MissionTimeout { phase }),
                _ = tokio::time::sleep_until(phase_deadline) => {
                    let pending = self.state.active_record().map(|r| r.pending()).unwrap_or_default();
                    warn!(mission_id = %self.mission_id(), phase = %phase, pending = ?pending, "Phase barrier expired");
                    return None;
                }
                received = self.endpoint.receive(&self.cancel) => received,
            };

            match received {
                Ok(message) => {
                    if let Some(reason) = self.handle_message(phase, message).await {
                        return Some(reason);
                    }
                }
                Err(BusError::Cancelled) => return Some(AbortReason::Cancelled { phase }),
                Err(e) => {
                    error!(mission_id = %self.mission_id(), "Orchestrator mailbox failed: {}", e);
                    return None;
                }
            }
        }
        None
    }

    /// Process whatever is still queued before the gate runs
    async fn drain(&mut self, phase: Phase) -> Option<AbortReason> {
        while let Ok(Some(message)) = self.endpoint.try_receive().await {
            if let Some(reason) = self.handle_message(phase, message).await {
                return Some(reason);
            }
        }
        None
    }

    async fn handle_message(&mut self, phase: Phase, message: Message) -> Option<AbortReason> {
        let sender = message.sender().to_string();
        let priority = message.priority();
        let abort = match message.into_payload() {
            Payload::Report(report) if report.agent_id != sender => {
                self.bus
                    .record_security_event(
                        &sender,
                        ORCHESTRATOR_ID,
                        format!("report claims to come from {}", report.agent_id),
                    )
                    .await;
                None
            }
            Payload::Report(report) => self.accept_report(phase, report).await,
            Payload::Intel(intel) => {
                debug!(sender = %sender, source = %intel.source, "Intel received");
                self.fusion.ingest([intel]);
                self.fusion.fuse(Utc::now(), phase).await;
                None
            }
            Payload::Sitrep(sitrep) => {
                debug!(
                    agent_id = %sitrep.agent_id,
                    phase = %sitrep.phase,
                    stage = ?sitrep.stage,
                    "SITREP: {}",
                    sitrep.note
                );
                None
            }
            Payload::Alert(alert) => {
                self.events.emit(MissionEvent::AlertRaised {
                    mission_id: self.mission_id().to_string(),
                    alert: alert.clone(),
                });
                match alert.kind {
                    AlertKind::ThreatEscalation if sender == FUSION_ID && priority == Priority::Flash => {
                        Some(AbortReason::ThreatEscalation {
                            phase,
                            targets: alert.targets,
                            score: self.fusion.latest().overall_score,
                        })
                    }
                    AlertKind::AgentFault if priority == Priority::Flash => self.agent_fault(&sender, phase, alert.detail),
                    _ => {
                        warn!(sender = %sender, kind = ?alert.kind, "Alert: {}", alert.detail);
                        None
                    }
                }
            }
            other => {
                warn!(sender = %sender, kind = other.kind(), "Unexpected message for orchestrator");
                None
            }
        };
        self.flush_security_events().await;
        abort
    }

    async fn accept_report(&mut self, phase: Phase, report: AgentReport) -> Option<AbortReason> {
        let intel = report.intel.clone();
        let snapshot = report.clone();
        if !self.state.record_report(report) {
            return None;
        }
        debug!(
            agent_id = %snapshot.agent_id,
            phase = %phase,
            status = ?snapshot.status,
            "Report received"
        );
        self.roster.record_report(&snapshot);
        if !intel.is_empty() {
            self.fusion.ingest(intel);
            self.fusion.fuse(Utc::now(), phase).await;
        }

        // Covers a fault whose FLASH alert never made it onto the bus
        let errored = self
            .roster
            .get(&snapshot.agent_id)
            .is_some_and(|a| a.status == AgentStatus::Error);
        if snapshot.failure == Some(FailureKind::Fatal) && !errored {
            return self.agent_fault(&snapshot.agent_id, phase, snapshot.findings.join("; "));
        }
        None
    }

    /// Abort on a fatal agent fault, or take the agent out of selection
    fn agent_fault(&mut self, agent_id: &str, phase: Phase, detail: String) -> Option<AbortReason> {
        if self.config.gate.abort_on_agent_fault {
            return Some(AbortReason::AgentFatal {
                agent_id: agent_id.to_string(),
                phase,
                detail,
            });
        }
        self.roster.mark_error(agent_id);
        None
    }

    /// Count agents that missed the barrier as timed out
    fn fill_timeouts(&mut self) {
        let roster = &self.roster;
        let mut synthesized = Vec::new();
        self.state.synthesize_missing(|id, phase, attempt| {
            let capability = roster.get(id).map(|a| a.capability).unwrap_or(Capability::Monitoring);
            let report = AgentReport::timed_out(id, capability, phase, attempt);
            synthesized.push(report.clone());
            report
        });
        for report in &synthesized {
            self.roster.record_report(report);
        }
    }

    /// Surface bus authentication failures recorded since the last flush
    async fn flush_security_events(&mut self) {
        for event in self.bus.security_events_since(self.security_seen).await {
            self.security_seen += 1;
            self.events.emit(MissionEvent::SecurityEvent {
                mission_id: self.mission_id().to_string(),
                event,
            });
        }
    }

    async fn finish(mut self, abort_reason: Option<AbortReason>) -> MissionResult {
        self.spawner
            .shutdown_all(&self.endpoint, self.config.timeouts.shutdown_grace())
            .await;
        self.roster.retire_all();
        self.cancel.cancel();

        self.fusion.fuse(Utc::now(), self.state.phase()).await;
        self.flush_security_events().await;
        let security_events = self.security_seen;

        let final_phase = self.state.phase();
        let total_retries = self.state.total_retries();
        let status = MissionStatus::determine(final_phase, self.state.history(), total_retries);
        let assessment = self.fusion.latest().clone();
        let summary = self
            .summary
            .take()
            .unwrap_or_else(|| MissionSummary::build(self.state.history(), &assessment));
        let findings = collect_findings(self.state.history());
        let agents = self.roster.agents().iter().map(AgentSnapshot::from).collect();
        let started_at = self.state.started_at();
        let finished_at = self.state.finished_at().unwrap_or_else(Utc::now);

        info!(
            mission_id = %self.mission_id(),
            status = %status,
            final_phase = %final_phase,
            retries = total_retries,
            threat = %assessment.overall_level,
            "Mission finished"
        );
        self.events.emit(MissionEvent::MissionCompleted {
            mission_id: self.mission_id().to_string(),
            status,
            final_phase,
            at: finished_at,
        });

        let mission_id = self.mission_id().to_string();
        MissionResult {
            mission_id,
            status,
            final_phase,
            abort_reason,
            history: self.state.into_history(),
            assessment,
            summary,
            findings,
            total_retries,
            security_events,
            started_at,
            finished_at,
            agents,
        }
    }
}
