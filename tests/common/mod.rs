//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use phaseline::agent::{ProbeError, ProbeRequest, ProbeSample, TargetProbe};
use phaseline::config::Config;
use phaseline::MissionEvent;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

pub const TARGET: &str = "https://shop.test/";

/// What the scripted target does for one probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Ok,
    /// 403 from a bot defense
    Blocked,
    ServerError,
    Timeout,
    Fault,
    /// The probe implementation itself panics
    Panic,
    /// Answer normally after a delay
    Slow(Duration),
}

type Script = Box<dyn Fn(&ProbeRequest) -> Step + Send + Sync>;

/// Target probe driven by a closure over the request
pub struct ScriptedProbe {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ProbeRequest) -> Step + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every probe succeeds
    pub fn healthy() -> Self {
        Self::new(|_| Step::Ok)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn sample(target: &str, status: u16, blocked: bool) -> ProbeSample {
    ProbeSample {
        target: target.to_string(),
        status,
        latency_ms: 20,
        bytes: 1024,
        blocked,
        headers: BTreeMap::new(),
    }
}

#[async_trait]
impl TargetProbe for ScriptedProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeSample, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.script)(request) {
            Step::Ok => Ok(sample(&request.target, 200, false)),
            Step::Blocked => Ok(sample(&request.target, 403, true)),
            Step::ServerError => Ok(sample(&request.target, 503, false)),
            Step::Timeout => Err(ProbeError::Timeout(request.target.clone())),
            Step::Fault => Err(ProbeError::Fault("probe harness crashed".to_string())),
            Step::Panic => panic!("scripted target blew up on {}", request.target),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(sample(&request.target, 200, false))
            }
        }
    }
}

/// Defaults tightened so missions finish in milliseconds
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.timeouts.phase_timeout_ms = 2_000;
    config.timeouts.mission_timeout_ms = 10_000;
    config.timeouts.shutdown_grace_ms = 100;
    config.agents.retry_budget = 0;
    config.agents.retry_backoff_ms = 1;
    config.agents.sitrep_interval_ms = 1_000;
    config.agents.stealth_spacing_ms = 1;
    config.bus.send_backoff_ms = 1;
    config
}

pub fn targets() -> Vec<String> {
    vec![TARGET.to_string()]
}

/// Everything emitted so far on a subscription
pub fn drain_events(rx: &mut broadcast::Receiver<MissionEvent>) -> Vec<MissionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
