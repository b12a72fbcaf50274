//! Agent task
//!
//! `AgentWorker::execute_phase` is the shared phase contract; `run` wraps it
//! in the bus loop that takes directives from the orchestrator and sends
//! SITREPs, reports and alerts back.

use super::capability::{Capability, TargetOutcome};
use super::probe::{ProbeError, ProbeRequest, ProbeSample, TargetProbe};
use super::{AgentReport, AgentSpec, FailureKind, MetricsDelta, PhaseDirective, ReportStatus};
use crate::bus::{Alert, AlertKind, BusEndpoint, Payload, Sitrep, SitrepStage, ORCHESTRATOR_ID};
use crate::config::AgentConfig;
use crate::error::{AgentError, BusError};
use crate::intel::IntelligenceReport;
use crate::types::{Phase, Priority};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Samples gathered against one target in one try
struct TargetSamples {
    target: String,
    samples: Vec<ProbeSample>,
    /// Last transient error when every probe failed
    transient: Option<ProbeError>,
}

/// A phase-capable agent bound to one mission's target set
pub struct AgentWorker {
    spec: AgentSpec,
    probe: Arc<dyn TargetProbe>,
    config: AgentConfig,
    mission_targets: BTreeSet<String>,
}

impl AgentWorker {
    pub fn new(spec: AgentSpec, probe: Arc<dyn TargetProbe>, config: AgentConfig, mission_targets: &[String]) -> Self {
        Self {
            spec,
            probe,
            config,
            mission_targets: mission_targets.iter().cloned().collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn capability(&self) -> Capability {
        self.spec.capability
    }

    fn check_directive(&self, phase: Phase, directive: &PhaseDirective) -> Result<(), AgentError> {
        if directive.phase != phase {
            return Err(AgentError::InvalidDirective(format!(
                "directive is for {} but phase is {}",
                directive.phase, phase
            )));
        }
        if phase.is_terminal() {
            return Err(AgentError::InvalidDirective(format!("{} is not a working phase", phase)));
        }
        if let Some(outside) = directive.targets.iter().find(|t| !self.mission_targets.contains(*t)) {
            return Err(AgentError::InvalidDirective(format!(
                "target {} is outside the mission target set",
                outside
            )));
        }
        Ok(())
    }

    async fn probe_target(
        &self,
        directive: &PhaseDirective,
        target: &str,
        metrics: &mut MetricsDelta,
    ) -> Result<TargetSamples, AgentError> {
        let count = self.spec.capability.samples_for(directive.phase, directive.intensity);
        let request = |sample_index| ProbeRequest {
            agent_id: self.spec.id.clone(),
            capability: self.spec.capability,
            phase: directive.phase,
            attempt: directive.attempt,
            target: target.to_string(),
            sample_index,
        };

        let results = if self.spec.capability.is_concurrent() {
            let requests: Vec<ProbeRequest> = (0..count).map(request).collect();
            join_all(requests.iter().map(|r| self.probe.probe(r))).await
        } else {
            let mut results = Vec::with_capacity(count);
            for index in 0..count {
                if index > 0 && directive.intensity.is_paced() {
                    tokio::time::sleep(Duration::from_millis(self.config.stealth_spacing_ms)).await;
                }
                results.push(self.probe.probe(&request(index)).await);
            }
            results
        };

        let mut samples = Vec::new();
        let mut transient = None;
        for result in results {
            match result {
                Ok(sample) => {
                    metrics.record_sample(&sample);
                    samples.push(sample);
                }
                Err(e) if e.is_transient() => {
                    metrics.record_error();
                    transient = Some(e);
                }
                Err(e) => {
                    metrics.record_error();
                    return Err(AgentError::Fatal(e.to_string()));
                }
            }
        }

        Ok(TargetSamples {
            target: target.to_string(),
            transient: if samples.is_empty() { transient } else { None },
            samples,
        })
    }

    /// One try at every target. A target whose probes all failed transiently
    /// makes the whole try transient.
    async fn attempt(
        &self,
        directive: &PhaseDirective,
        metrics: &mut MetricsDelta,
    ) -> Result<Vec<TargetSamples>, AgentError> {
        let mut collected = Vec::with_capacity(directive.targets.len());
        for target in &directive.targets {
            let samples = self.probe_target(directive, target, metrics).await?;
            if let Some(e) = &samples.transient {
                return Err(AgentError::Transient {
                    target: samples.target.clone(),
                    reason: e.to_string(),
                });
            }
            collected.push(samples);
        }
        Ok(collected)
    }

    /// Execute one phase attempt and produce a report. Never fails: every
    /// error is folded into a FAILED report.
    pub async fn execute_phase(&self, phase: Phase, directive: &PhaseDirective) -> AgentReport {
        let capability = self.spec.capability;
        if let Err(e) = self.check_directive(phase, directive) {
            warn!(agent_id = %self.spec.id, phase = %phase, "Rejected directive: {}", e);
            return AgentReport::failed(&self.spec.id, capability, phase, directive.attempt, FailureKind::Rejected, e.to_string());
        }

        let mut metrics = MetricsDelta::default();
        let mut retries_used = 0;
        let outcome = loop {
            match self.attempt(directive, &mut metrics).await {
                Err(e) if e.is_transient() && retries_used < self.config.retry_budget => {
                    retries_used += 1;
                    let delay = self.config.backoff(retries_used);
                    info!(
                        agent_id = %self.spec.id,
                        phase = %phase,
                        retry = retries_used,
                        "Transient failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };

        let mut report = match outcome {
            Ok(collected) => self.build_report(phase, directive.attempt, &collected),
            Err(e) => {
                let kind = match e {
                    AgentError::Transient { .. } => FailureKind::Transient,
                    AgentError::Fatal(_) => FailureKind::Fatal,
                    AgentError::InvalidDirective(_) => FailureKind::Rejected,
                };
                AgentReport::failed(&self.spec.id, capability, phase, directive.attempt, kind, e.to_string())
            }
        };
        report.metrics = metrics;
        report.retries_used = retries_used;
        report
    }

    fn build_report(&self, phase: Phase, attempt: u32, collected: &[TargetSamples]) -> AgentReport {
        let capability = self.spec.capability;
        let mut passed = 0;
        let mut findings = Vec::new();
        let mut intel = Vec::new();

        for target in collected {
            let TargetOutcome { passed: ok, signal, finding } = capability.evaluate(&target.target, &target.samples);
            if ok {
                passed += 1;
            }
            findings.extend(finding);
            intel.push(
                IntelligenceReport::new(
                    capability.intel_source(),
                    &self.spec.id,
                    &target.target,
                    capability.base_confidence(),
                    signal,
                    format!("{} {} observation", capability, phase),
                )
                .with_details(serde_json::json!({
                    "samples": target.samples.len(),
                    "blocked": target.samples.iter().filter(|s| s.blocked).count(),
                    "phase": phase,
                })),
            );
        }

        let (status, failure) = if passed == collected.len() {
            (ReportStatus::Success, None)
        } else if passed > 0 {
            (ReportStatus::Partial, None)
        } else {
            (ReportStatus::Failed, Some(FailureKind::ObjectiveUnmet))
        };

        AgentReport {
            agent_id: self.spec.id.clone(),
            capability,
            phase,
            attempt,
            status,
            failure,
            metrics: MetricsDelta::default(),
            intel,
            findings,
            retries_used: 0,
            completed_at: Utc::now(),
        }
    }

    /// Agent loop: wait for directives until shutdown or cancellation
    pub async fn run(self, endpoint: BusEndpoint, cancel: CancellationToken) {
        info!(agent_id = %self.spec.id, capability = %self.spec.capability, "Agent online");
        loop {
            let message = match endpoint.receive(&cancel).await {
                Ok(message) => message,
                Err(BusError::Cancelled) => break,
                Err(e) => {
                    warn!(agent_id = %self.spec.id, "Agent receive failed: {}", e);
                    break;
                }
            };
            if message.sender() != ORCHESTRATOR_ID {
                warn!(agent_id = %self.spec.id, sender = message.sender(), "Ignoring message not sent by orchestrator");
                continue;
            }
            match message.into_payload() {
                Payload::Directive(directive) => {
                    if !self.handle_directive(&endpoint, directive, &cancel).await {
                        break;
                    }
                }
                Payload::Shutdown => {
                    info!(agent_id = %self.spec.id, "Agent shutting down");
                    break;
                }
                other => debug!(agent_id = %self.spec.id, kind = other.kind(), "Ignoring unexpected payload"),
            }
        }
    }

    async fn sitrep(&self, endpoint: &BusEndpoint, directive: &PhaseDirective, stage: SitrepStage, note: String) {
        let sitrep = Sitrep {
            agent_id: self.spec.id.clone(),
            phase: directive.phase,
            attempt: directive.attempt,
            stage,
            note,
        };
        if let Err(e) = endpoint.send(ORCHESTRATOR_ID, Priority::Routine, Payload::Sitrep(sitrep)).await {
            debug!(agent_id = %self.spec.id, "SITREP dropped: {}", e);
        }
    }

    async fn alert(&self, endpoint: &BusEndpoint, directive: &PhaseDirective, priority: Priority, kind: AlertKind, detail: String) {
        let alert = Alert {
            kind,
            source: self.spec.id.clone(),
            phase: directive.phase,
            detail,
            targets: directive.targets.clone(),
        };
        if let Err(e) = endpoint.send_with_backoff(ORCHESTRATOR_ID, priority, Payload::Alert(alert)).await {
            error!(agent_id = %self.spec.id, "Failed to deliver alert: {}", e);
        }
    }

    /// Fold a panic during phase execution into a fatal report
    fn panicked(&self, directive: &PhaseDirective, panic: &(dyn Any + Send)) -> AgentReport {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        AgentReport::failed(
            &self.spec.id,
            self.spec.capability,
            directive.phase,
            directive.attempt,
            FailureKind::Fatal,
            format!("agent panicked: {}", reason),
        )
    }

    /// Returns false when the mission was cancelled mid-phase
    async fn handle_directive(&self, endpoint: &BusEndpoint, directive: PhaseDirective, cancel: &CancellationToken) -> bool {
        let phase = directive.phase;
        self.sitrep(
            endpoint,
            &directive,
            SitrepStage::Entry,
            format!("entering {} with {} target(s)", phase, directive.targets.len()),
        )
        .await;

        let interval = Duration::from_millis(self.config.sitrep_interval_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        let execution = AssertUnwindSafe(self.execute_phase(phase, &directive)).catch_unwind();
        tokio::pin!(execution);

        let report = loop {
            tokio::select! {
                outcome = &mut execution => {
                    break outcome.unwrap_or_else(|panic| self.panicked(&directive, &*panic));
                }
                _ = ticker.tick() => {
                    self.sitrep(endpoint, &directive, SitrepStage::Progress, format!("{} in progress", phase)).await;
                }
                _ = cancel.cancelled() => return false,
            }
        };

        self.sitrep(
            endpoint,
            &directive,
            SitrepStage::Exit,
            format!("leaving {} with status {:?}", phase, report.status),
        )
        .await;

        let alert = match report.failure {
            Some(FailureKind::Fatal) => Some((Priority::Flash, AlertKind::AgentFault)),
            Some(_) => Some((Priority::Priority, AlertKind::AgentFailure)),
            None => None,
        };
        let detail = report.findings.join("; ");

        // A FLASH fault must be queued ahead of the report that completes the barrier
        if let Some((Priority::Flash, kind)) = alert {
            error!(agent_id = %self.spec.id, phase = %phase, "Agent fault: {}", detail);
            self.alert(endpoint, &directive, Priority::Flash, kind, detail.clone()).await;
        }

        if let Err(e) = endpoint
            .send_with_backoff(ORCHESTRATOR_ID, Priority::Immediate, Payload::Report(report))
            .await
        {
            error!(agent_id = %self.spec.id, phase = %phase, "Failed to deliver report: {}", e);
        }

        if let Some((priority, kind)) = alert.filter(|(priority, _)| *priority != Priority::Flash) {
            warn!(agent_id = %self.spec.id, phase = %phase, "Agent failed: {}", detail);
            self.alert(endpoint, &directive, priority, kind, detail).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::create_agent_spec;
    use crate::agent::probe::MockTargetProbe;
    use crate::types::Intensity;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TARGET: &str = "https://shop.test/";

    fn ok_sample() -> ProbeSample {
        ProbeSample {
            target: TARGET.to_string(),
            status: 200,
            latency_ms: 30,
            bytes: 2048,
            blocked: false,
            headers: BTreeMap::new(),
        }
    }

    fn fast_config(retry_budget: u32) -> AgentConfig {
        AgentConfig {
            retry_budget,
            retry_backoff_ms: 1,
            sitrep_interval_ms: 1000,
            stealth_spacing_ms: 1,
        }
    }

    fn directive(phase: Phase, targets: &[&str]) -> PhaseDirective {
        PhaseDirective {
            mission_id: "m-1".to_string(),
            phase,
            attempt: 0,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            intensity: Intensity::Moderate,
        }
    }

    fn worker(capability: Capability, probe: MockTargetProbe, retry_budget: u32) -> AgentWorker {
        AgentWorker::new(
            create_agent_spec(capability, 1),
            Arc::new(probe),
            fast_config(retry_budget),
            &[TARGET.to_string()],
        )
    }

    #[tokio::test]
    async fn test_success_report() {
        let mut probe = MockTargetProbe::new();
        probe.expect_probe().times(3).returning(|_| Ok(ok_sample()));
        let worker = worker(Capability::Reconnaissance, probe, 2);

        let report = worker.execute_phase(Phase::Target, &directive(Phase::Target, &[TARGET])).await;
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.metrics.probes, 3);
        assert_eq!(report.intel.len(), 1);
        assert_eq!(report.intel[0].signal, 0.0);
        assert_eq!(report.retries_used, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut probe = MockTargetProbe::new();
        probe.expect_probe().returning(move |req| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProbeError::Timeout(req.target.clone()))
            } else {
                Ok(ok_sample())
            }
        });
        let worker = worker(Capability::Monitoring, probe, 2);

        let report = worker.execute_phase(Phase::Infil, &directive(Phase::Infil, &[TARGET])).await;
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.retries_used, 1);
        assert_eq!(report.metrics.errors, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transient_budget_exhausted() {
        let mut probe = MockTargetProbe::new();
        probe
            .expect_probe()
            .times(3)
            .returning(|req| Err(ProbeError::Timeout(req.target.clone())));
        let worker = worker(Capability::Monitoring, probe, 2);

        let report = worker.execute_phase(Phase::Infil, &directive(Phase::Infil, &[TARGET])).await;
        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.failure, Some(FailureKind::Transient));
        assert_eq!(report.retries_used, 2);
        assert!(report.is_transient_failure());
    }

    #[tokio::test]
    async fn test_fault_is_fatal_without_retry() {
        let mut probe = MockTargetProbe::new();
        probe
            .expect_probe()
            .times(1)
            .returning(|_| Err(ProbeError::Fault("probe crashed".into())));
        let worker = worker(Capability::Monitoring, probe, 2);

        let report = worker.execute_phase(Phase::Infil, &directive(Phase::Infil, &[TARGET])).await;
        assert_eq!(report.failure, Some(FailureKind::Fatal));
        assert_eq!(report.retries_used, 0);
    }

    #[tokio::test]
    async fn test_rejects_foreign_target() {
        let mut probe = MockTargetProbe::new();
        probe.expect_probe().never();
        let worker = worker(Capability::Reconnaissance, probe, 2);

        let report = worker
            .execute_phase(Phase::Target, &directive(Phase::Target, &["https://elsewhere.test/"]))
            .await;
        assert_eq!(report.failure, Some(FailureKind::Rejected));
    }

    #[tokio::test]
    async fn test_rejects_phase_mismatch() {
        let mut probe = MockTargetProbe::new();
        probe.expect_probe().never();
        let worker = worker(Capability::Reconnaissance, probe, 2);

        let report = worker.execute_phase(Phase::Infil, &directive(Phase::Target, &[TARGET])).await;
        assert_eq!(report.failure, Some(FailureKind::Rejected));
    }

    #[tokio::test]
    async fn test_stress_fires_scaled_samples() {
        let mut probe = MockTargetProbe::new();
        probe.expect_probe().times(12).returning(|_| Ok(ok_sample()));
        let worker = worker(Capability::StressTest, probe, 0);

        let report = worker.execute_phase(Phase::Assault, &directive(Phase::Assault, &[TARGET])).await;
        assert_eq!(report.metrics.probes, 12);
        assert_eq!(report.status, ReportStatus::Success);
    }
}
