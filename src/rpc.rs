//! `SubmitCode`: the one call between coordinator and judging worker.
//!
//! Carried as JSON over HTTP at [`SUBMIT_CODE_PATH`]. Enums travel as their
//! integer codes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Language, Verdict};
use crate::registry::Discovery;

pub const SUBMIT_CODE_PATH: &str = "/rpc/SubmitCode";

/// A judging job. `input` and `expected` are index-aligned and both hold
/// `total_num` entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JudgeRequest {
    pub user_id: i64,
    pub language: Language,
    pub code: String,
    pub input: Vec<String>,
    pub expected: Vec<String>,
    /// Milliseconds, for the whole job
    pub time_limit: i32,
    /// KiB
    pub memory_limit: i32,
    pub total_num: i32,
}

impl JudgeRequest {
    /// Checks the shape invariants of the job
    pub fn validate(&self) -> Result<()> {
        if self.total_num < 1 {
            bail!("total_num must be at least 1, got {}", self.total_num);
        }
        let total = self.total_num as usize;
        if self.input.len() != total || self.expected.len() != total {
            bail!(
                "expected {total} inputs and outputs, got {} and {}",
                self.input.len(),
                self.expected.len()
            );
        }
        if self.time_limit <= 0 || self.memory_limit <= 0 {
            bail!("limits must be positive");
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JudgeResponse {
    pub user_id: i64,
    pub status: Verdict,
    pub pass_num: i32,
    pub total_num: i32,
    /// KiB
    pub memory_usage: i32,
    /// Milliseconds
    pub runtime: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl JudgeResponse {
    /// A `SystemError` verdict that judged nothing
    pub fn system_error(request: &JudgeRequest, message: impl Into<String>) -> Self {
        Self {
            user_id: request.user_id,
            status: Verdict::SystemError,
            pass_num: 0,
            total_num: request.total_num,
            memory_usage: 0,
            runtime: 0,
            output: Some(message.into()),
        }
    }
}

/// Delivers a judging job to some judging worker and waits for its verdict
#[async_trait]
pub trait JudgeDispatcher: Send + Sync {
    async fn dispatch(&self, request: &JudgeRequest) -> Result<JudgeResponse>;
}

/// Dispatches over HTTP to workers found through service discovery.
///
/// Instances are resolved on every call and rotated round-robin. A transport
/// failure moves on to the next instance until `attempts` calls were made.
pub struct RemoteJudge {
    discovery: Arc<dyn Discovery>,
    service: String,
    client: reqwest::Client,
    attempts: usize,
    next: AtomicUsize,
}

impl RemoteJudge {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        service: impl Into<String>,
        attempts: usize,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .context("failed to build RPC client")?;
        Ok(Self {
            discovery,
            service: service.into(),
            client,
            attempts: attempts.max(1),
            next: AtomicUsize::new(0),
        })
    }

    async fn call(&self, address: &str, request: &JudgeRequest) -> Result<JudgeResponse> {
        let url = format!("http://{address}{SUBMIT_CODE_PATH}");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl JudgeDispatcher for RemoteJudge {
    async fn dispatch(&self, request: &JudgeRequest) -> Result<JudgeResponse> {
        let instances = self.discovery.resolve(&self.service).await?;
        if instances.is_empty() {
            bail!("no live instance of {}", self.service);
        }

        let mut last_error = None;
        for _ in 0..self.attempts {
            let slot = self.next.fetch_add(1, Ordering::Relaxed) % instances.len();
            let address = &instances[slot];
            match self.call(address, request).await {
                Ok(response) => {
                    log::debug!("Job of user {} judged by {address}", request.user_id);
                    return Ok(response);
                }
                Err(e) => {
                    log::warn!("SubmitCode to {address} failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("no attempt made"))
            .context(format!("all {} dispatch attempts failed", self.attempts)))
    }
}
