//! Target boundary
//!
//! Agents only see the system under test through `TargetProbe`: one request
//! against one endpoint, measured from the outside.

use super::capability::Capability;
use crate::config::ProbeConfig;
use crate::types::Phase;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Response headers worth keeping on a sample
const KEPT_HEADERS: [&str; 6] = [
    "server",
    "content-type",
    "retry-after",
    "cf-ray",
    "x-cache",
    "x-ratelimit-remaining",
];

/// Challenge pages served by common bot-defense products
static CHALLENGE_MARKER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(captcha|are you a robot|access denied|cf-chl|challenge-platform|verify you are human)").ok()
});

/// One probe to issue
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub agent_id: String,
    pub capability: Capability,
    pub phase: Phase,
    pub attempt: u32,
    pub target: String,
    pub sample_index: usize,
}

/// Outside measurement of one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSample {
    pub target: String,
    pub status: u16,
    pub latency_ms: u64,
    pub bytes: u64,
    /// Rate limited or served a bot challenge
    pub blocked: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ProbeSample {
    /// Served normally: 2xx/3xx and not blocked
    pub fn is_ok(&self) -> bool {
        (200..400).contains(&self.status) && !self.blocked
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("{target} unreachable: {reason}")]
    Unreachable { target: String, reason: String },
    /// Probe machinery itself is broken; not worth retrying
    #[error("probe fault: {0}")]
    Fault(String),
}

impl ProbeError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProbeError::Fault(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeSample, ProbeError>;
}

/// Probe over HTTP(S) with reqwest
pub struct HttpProbe {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

/// Whether a response looks like a block or a bot challenge
pub fn is_blocked(status: u16, body: &str) -> bool {
    if status == 403 || status == 429 {
        return true;
    }
    CHALLENGE_MARKER
        .as_ref()
        .map(|re| re.is_match(body))
        .unwrap_or(false)
}

#[async_trait]
impl TargetProbe for HttpProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeSample, ProbeError> {
        let started = Instant::now();
        let response = self.client.get(&request.target).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(request.target.clone())
            } else if e.is_builder() {
                ProbeError::Fault(e.to_string())
            } else {
                ProbeError::Unreachable {
                    target: request.target.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| KEPT_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
            .collect();

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(request.target.clone())
            } else {
                ProbeError::Unreachable {
                    target: request.target.clone(),
                    reason: e.to_string(),
                }
            }
        })?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let inspected = &body[..body.len().min(self.max_body_bytes)];

        Ok(ProbeSample {
            target: request.target.clone(),
            status,
            latency_ms,
            bytes: body.len() as u64,
            blocked: is_blocked(status, &String::from_utf8_lossy(inspected)),
            headers,
        })
    }
}
