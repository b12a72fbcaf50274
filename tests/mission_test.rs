//! End-to-end missions against a scripted target

mod common;

use common::{drain_events, fast_config, targets, ScriptedProbe, Step, TARGET};
use phaseline::agent::{create_agent_spec, FailureKind};
use phaseline::bus::AlertKind;
use phaseline::orchestrator::PhaseOutcome;
use phaseline::{
    AbortReason, AgentStatus, Capability, MissionError, MissionEvent, MissionOrchestrator, MissionParameters,
    MissionStatus, MissionType, Phase, ThreatLevel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn params(mission_type: MissionType) -> MissionParameters {
    MissionParameters::new("MSN-TEST-1", targets()).with_mission_type(mission_type)
}

#[tokio::test]
async fn test_all_success_completes() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe.clone()).unwrap();
    let mut events = orchestrator.subscribe();

    let result = orchestrator.execute_mission(params(MissionType::SpecialRecon)).await.unwrap();

    assert_eq!(result.status, MissionStatus::Success);
    assert_eq!(result.final_phase, Phase::Completed);
    assert!(result.abort_reason.is_none());
    assert_eq!(result.total_retries, 0);
    assert_eq!(
        result.phases_visited(),
        vec![Phase::Infil, Phase::Target, Phase::Assault, Phase::Consolidate, Phase::Exfil]
    );
    assert!(result
        .history
        .iter()
        .all(|r| r.outcome == Some(PhaseOutcome::Advanced)));
    assert_eq!(result.assessment.overall_level, ThreatLevel::Green);
    assert_eq!(result.agents.len(), 5);
    assert!(result.agents.iter().all(|a| a.status == AgentStatus::Offline));
    assert!(result.summary.total_probes > 0);
    assert_eq!(result.summary.total_errors, 0);
    assert!(probe.calls() > 0);

    let events = drain_events(&mut events);
    assert_eq!(events.first().map(|e| e.event_type()), Some("mission_started"));
    assert_eq!(events.last().map(|e| e.event_type()), Some("mission_completed"));
    let entered: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            MissionEvent::PhaseEntered { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        entered,
        vec![Phase::Infil, Phase::Target, Phase::Assault, Phase::Consolidate, Phase::Exfil]
    );
    assert!(events.iter().all(|e| e.mission_id() == "MSN-TEST-1"));
}

#[tokio::test]
async fn test_each_report_once_per_attempt() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert!(result.is_completed());
    for record in &result.history {
        assert_eq!(record.reports.len(), record.selected.len());
        for id in &record.selected {
            assert_eq!(record.reports.iter().filter(|r| &r.agent_id == id).count(), 1);
        }
        assert!(record.reports.iter().all(|r| r.phase == record.phase && r.attempt == record.attempt));
    }
}

#[tokio::test]
async fn test_critical_threat_aborts_in_assault() {
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.phase == Phase::Assault && req.capability == Capability::StressTest {
            Step::Blocked
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();
    let mut events = orchestrator.subscribe();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    assert_eq!(result.final_phase, Phase::Aborted);
    assert_eq!(result.phases_visited(), vec![Phase::Infil, Phase::Target, Phase::Assault]);
    match &result.abort_reason {
        Some(AbortReason::ThreatEscalation { phase, targets, .. }) => {
            assert_eq!(*phase, Phase::Assault);
            assert_eq!(targets, &vec![TARGET.to_string()]);
        }
        other => panic!("expected threat escalation, got {:?}", other),
    }
    assert_eq!(result.assessment.overall_level, ThreatLevel::Red);
    assert!(result.assessment.red_targets.contains(&TARGET.to_string()));
    assert!(result.findings.iter().any(|f| f.detail.contains("blocked")));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        MissionEvent::AlertRaised { alert, .. } if alert.kind == AlertKind::ThreatEscalation
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, MissionEvent::PhaseEntered { phase: Phase::Consolidate, .. })));
}

#[tokio::test]
async fn test_transient_failure_retries_phase() {
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.phase == Phase::Target && req.attempt == 0 && req.capability == Capability::Reconnaissance {
            Step::Timeout
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();
    let mut events = orchestrator.subscribe();

    let result = orchestrator.execute_mission(params(MissionType::SpecialRecon)).await.unwrap();

    assert_eq!(result.final_phase, Phase::Completed);
    assert_eq!(result.status, MissionStatus::Partial);
    assert_eq!(result.total_retries, 1);

    let target: Vec<_> = result.history.iter().filter(|r| r.phase == Phase::Target).collect();
    assert_eq!(target.len(), 2);
    assert_eq!(target[0].outcome, Some(PhaseOutcome::Retried));
    assert_eq!(target[1].outcome, Some(PhaseOutcome::Advanced));
    assert_eq!(target[1].attempt, 1);
    let failed = target[0]
        .reports
        .iter()
        .find(|r| r.agent_id == "reconnaissance-1")
        .unwrap();
    assert_eq!(failed.failure, Some(FailureKind::Transient));

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        MissionEvent::PhaseRetried { phase: Phase::Target, attempt: 1, .. }
    )));
}

#[tokio::test]
async fn test_phase_timeout_exhausts_retries() {
    let mut config = fast_config();
    config.timeouts.phase_timeout_ms = 200;
    config.gate.max_phase_retries = 0;
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.capability == Capability::Monitoring {
            Step::Slow(Duration::from_secs(5))
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(config, probe).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        orchestrator.execute_mission(params(MissionType::SpecialRecon)),
    )
    .await
    .expect("mission should not hang on a stuck agent")
    .unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    assert_eq!(
        result.abort_reason,
        Some(AbortReason::RetriesExhausted {
            phase: Phase::Infil,
            retries: 0
        })
    );
    let infil = &result.history[0];
    let timed_out = infil.reports.iter().find(|r| r.agent_id == "monitoring-1").unwrap();
    assert_eq!(timed_out.failure, Some(FailureKind::PhaseTimeout));
}

#[tokio::test]
async fn test_cancellation_aborts_mission() {
    let probe = Arc::new(ScriptedProbe::new(|_| Step::Slow(Duration::from_secs(5))));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        orchestrator.execute_mission_with_cancel(params(MissionType::SpecialRecon), cancel),
    )
    .await
    .expect("cancellation should end the mission promptly")
    .unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::Cancelled { phase: Phase::Infil }));
    assert_eq!(result.history[0].outcome, Some(PhaseOutcome::Aborted));
}

#[tokio::test]
async fn test_mission_time_limit() {
    let probe = Arc::new(ScriptedProbe::new(|_| Step::Slow(Duration::from_secs(5))));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();
    let params = params(MissionType::SpecialRecon).with_time_limit(Duration::from_millis(200));

    let result = tokio::time::timeout(Duration::from_secs(3), orchestrator.execute_mission(params))
        .await
        .expect("mission deadline should fire")
        .unwrap();

    assert_eq!(result.final_phase, Phase::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::MissionTimeout { phase: Phase::Infil }));
}

#[tokio::test]
async fn test_invalid_parameters_rejected() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe.clone()).unwrap();

    let empty = MissionParameters::new("MSN-EMPTY", Vec::new());
    assert!(matches!(
        orchestrator.execute_mission(empty).await,
        Err(MissionError::InvalidParameters(_))
    ));

    let bad_url = MissionParameters::new("MSN-BAD", vec!["ftp://files.test".to_string()]);
    assert!(matches!(
        orchestrator.execute_mission(bad_url).await,
        Err(MissionError::InvalidParameters(_))
    ));
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_roster_missing_required_capability() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe)
        .unwrap()
        .with_roster(vec![create_agent_spec(Capability::Monitoring, 1)]);

    let err = orchestrator
        .execute_mission(params(MissionType::DirectAction))
        .await
        .unwrap_err();
    assert!(matches!(err, MissionError::InvalidRoster(_)));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = fast_config();
    config.gate.required_success_ratio = 1.5;
    let probe = Arc::new(ScriptedProbe::healthy());
    assert!(matches!(
        MissionOrchestrator::new(config, probe),
        Err(MissionError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_explicit_roster() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap().with_roster(vec![
        create_agent_spec(Capability::Reconnaissance, 1),
        create_agent_spec(Capability::Reconnaissance, 2),
    ]);

    let result = orchestrator.execute_mission(params(MissionType::SpecialRecon)).await.unwrap();

    assert_eq!(result.status, MissionStatus::Success);
    assert_eq!(result.agents.len(), 2);
    assert_eq!(result.history[0].selected, vec!["reconnaissance-1", "reconnaissance-2"]);
}

#[tokio::test]
async fn test_agent_fault_aborts() {
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.capability == Capability::CoreValidation {
            Step::Fault
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    match &result.abort_reason {
        Some(AbortReason::AgentFatal { agent_id, phase, .. }) => {
            assert_eq!(agent_id, "core-validation-1");
            assert_eq!(*phase, Phase::Assault);
        }
        other => panic!("expected agent fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_agent_fault_tolerated_when_configured() {
    let mut config = fast_config();
    config.gate.abort_on_agent_fault = false;
    config.gate.required_success_ratio = 0.5;
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.capability == Capability::CoreValidation {
            Step::Fault
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(config, probe).unwrap();
    let mut events = orchestrator.subscribe();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert_eq!(result.final_phase, Phase::Completed);
    assert_eq!(result.status, MissionStatus::Partial);
    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        MissionEvent::AlertRaised { alert, .. } if alert.kind == AlertKind::AgentFault
    )));
}

#[tokio::test]
async fn test_red_baseline_aborts_at_first_gate() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();
    let params = params(MissionType::SpecialRecon).with_threat_level(ThreatLevel::Red);

    let result = orchestrator.execute_mission(params).await.unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    assert!(matches!(
        result.abort_reason,
        Some(AbortReason::ThreatEscalation { phase: Phase::Infil, .. })
    ));
}

#[tokio::test]
async fn test_concurrent_missions_are_isolated() {
    let probe = Arc::new(ScriptedProbe::healthy());
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();

    let first = MissionParameters::new("MSN-A", targets());
    let second = MissionParameters::new("MSN-B", vec!["https://other.test/".to_string()]);
    let (a, b) = tokio::join!(orchestrator.execute_mission(first), orchestrator.execute_mission(second));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.status, MissionStatus::Success);
    assert_eq!(b.status, MissionStatus::Success);
    assert!(a.assessment.targets.keys().all(|t| t == TARGET));
    assert!(b.assessment.targets.keys().all(|t| t == "https://other.test/"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fault_aborts_in_the_faulting_phase() {
    let mut config = fast_config();
    config.gate.required_success_ratio = 0.8;
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.agent_id == "reconnaissance-5" {
            Step::Fault
        } else {
            Step::Ok
        }
    }));
    let specs = (1..=5).map(|i| create_agent_spec(Capability::Reconnaissance, i)).collect();
    let orchestrator = MissionOrchestrator::new(config, probe).unwrap().with_roster(specs);

    for run in 0..40 {
        let params = MissionParameters::new(format!("MSN-RACE-{}", run), targets());
        let result = orchestrator.execute_mission(params).await.unwrap();

        assert_eq!(result.status, MissionStatus::Aborted);
        match &result.abort_reason {
            Some(AbortReason::AgentFatal { agent_id, phase, .. }) => {
                assert_eq!(agent_id, "reconnaissance-5");
                assert_eq!(*phase, Phase::Infil, "run {} advanced past the fault", run);
            }
            other => panic!("run {}: expected agent fault, got {:?}", run, other),
        }
        assert!(result
            .history
            .iter()
            .all(|r| r.phase == Phase::Infil && r.outcome != Some(PhaseOutcome::Advanced)));
    }
}

#[tokio::test]
async fn test_agent_panic_aborts_as_fault() {
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.capability == Capability::CoreValidation {
            Step::Panic
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(fast_config(), probe).unwrap();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert_eq!(result.status, MissionStatus::Aborted);
    assert_eq!(result.total_retries, 0);
    match &result.abort_reason {
        Some(AbortReason::AgentFatal { agent_id, phase, detail }) => {
            assert_eq!(agent_id, "core-validation-1");
            assert_eq!(*phase, Phase::Assault);
            assert!(detail.contains("panicked"));
        }
        other => panic!("expected agent fault, got {:?}", other),
    }
}

#[tokio::test]
async fn test_agent_panic_tolerated_when_configured() {
    let mut config = fast_config();
    config.gate.abort_on_agent_fault = false;
    config.gate.required_success_ratio = 0.5;
    let probe = Arc::new(ScriptedProbe::new(|req| {
        if req.capability == Capability::CoreValidation {
            Step::Panic
        } else {
            Step::Ok
        }
    }));
    let orchestrator = MissionOrchestrator::new(config, probe).unwrap();

    let result = orchestrator.execute_mission(params(MissionType::DirectAction)).await.unwrap();

    assert_eq!(result.final_phase, Phase::Completed);
    let assault = result.history.iter().find(|r| r.phase == Phase::Assault).unwrap();
    let report = assault
        .reports
        .iter()
        .find(|r| r.agent_id == "core-validation-1")
        .unwrap();
    assert_eq!(report.failure, Some(FailureKind::Fatal));
}
