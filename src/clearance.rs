//! Shared challenge-clearance state and its background refresh service.
//!
//! Every bot reads the same (token, user-agent) pair on every outbound call.
//! A single background loop re-acquires the pair through an external solving
//! collaborator when it expires or stops validating; a refresh mutex keeps the
//! slow acquisition from ever running more than once at a time.

use crate::config;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A clearance token paired with the user-agent it was solved under.
#[derive(Debug, Clone)]
pub struct Clearance {
    pub token: String,
    pub user_agent: String,
    pub acquired_at: Instant,
}

impl Clearance {
    #[must_use]
    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Process-wide current clearance. Published under a write lock by the
/// refresh service, read cheaply by every bot; a read that is stale by up to
/// one refresh tick is acceptable.
pub struct ClearanceState {
    bootstrap_user_agent: String,
    current: RwLock<Option<Clearance>>,
}

impl ClearanceState {
    #[must_use]
    pub fn new(bootstrap_user_agent: impl Into<String>) -> Self {
        Self {
            bootstrap_user_agent: bootstrap_user_agent.into(),
            current: RwLock::new(None),
        }
    }

    /// Snapshot of the current clearance, if one has been acquired yet.
    #[must_use]
    pub fn current(&self) -> Option<Clearance> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// User-agent all bots should present. Falls back to the bootstrap value
    /// until the first clearance lands.
    #[must_use]
    pub fn user_agent(&self) -> String {
        self.current()
            .map_or_else(|| self.bootstrap_user_agent.clone(), |c| c.user_agent)
    }

    /// True when no clearance is held or the held one is older than `ttl`.
    #[must_use]
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.current().is_none_or(|c| c.age() > ttl)
    }

    /// Atomically overwrite the shared clearance.
    pub fn publish(&self, token: impl Into<String>, user_agent: impl Into<String>) {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Clearance {
            token: token.into(),
            user_agent: user_agent.into(),
            acquired_at: Instant::now(),
        });
    }
}

/// Result of one acquisition through the solving collaborator.
#[derive(Debug, Clone)]
pub struct Solution {
    pub token: String,
    pub user_agent: String,
}

/// External challenge-solving collaborator. Contract only; the mechanism
/// (browser automation, third-party API) lives behind this trait.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Run the (slow, possibly minutes-long) acquisition procedure once.
    async fn acquire(&self) -> Result<Solution>;

    /// Lightweight liveness probe of an existing clearance.
    async fn validate(&self, _clearance: &Clearance) -> Result<bool> {
        Ok(true)
    }
}

/// Singleton background refresh loop.
pub struct ClearanceService {
    state: Arc<ClearanceState>,
    solver: Arc<dyn Solver>,
    refresh_lock: Mutex<()>,
    ttl: Duration,
    tick: Duration,
}

impl ClearanceService {
    #[must_use]
    pub fn new(state: Arc<ClearanceState>, solver: Arc<dyn Solver>) -> Self {
        Self::with_intervals(
            state,
            solver,
            Duration::from_secs(config::CLEARANCE_TTL_SECS),
            Duration::from_secs(config::CLEARANCE_TICK_SECS),
        )
    }

    #[must_use]
    pub fn with_intervals(
        state: Arc<ClearanceState>,
        solver: Arc<dyn Solver>,
        ttl: Duration,
        tick: Duration,
    ) -> Self {
        Self {
            state,
            solver,
            refresh_lock: Mutex::new(()),
            ttl,
            tick,
        }
    }

    /// Run until the shutdown signal fires. Failures inside a tick are logged
    /// and never terminate the loop.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(ttl_secs = self.ttl.as_secs(), "clearance service started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("clearance service stopped");
                    return;
                }
                () = sleep(self.tick) => {}
            }
            self.tick().await;
        }
    }

    /// One staleness check plus at most one acquisition attempt.
    pub async fn tick(&self) {
        if !self.needs_refresh().await {
            return;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if !self.needs_refresh().await {
            return;
        }

        match self.solver.acquire().await {
            Ok(solution) => {
                self.state.publish(solution.token, solution.user_agent);
                info!("published fresh clearance");
            }
            Err(e) => {
                warn!(error = %e, "clearance acquisition failed; keeping previous value");
            }
        }
    }

    async fn needs_refresh(&self) -> bool {
        if self.state.is_stale(self.ttl) {
            return true;
        }
        let Some(clearance) = self.state.current() else {
            return true;
        };
        match self.solver.validate(&clearance).await {
            Ok(alive) => !alive,
            Err(e) => {
                // A probe that cannot run is not evidence the token is dead.
                debug!(error = %e, "liveness probe failed to run");
                false
            }
        }
    }
}

/// Client for a task-based HTTP solving API: create a task, then poll its
/// result until it completes or fails.
pub struct HttpSolver {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    target_url: String,
    user_agent: String,
}

impl HttpSolver {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        target_url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url: base_url.into(),
            api_key,
            target_url: target_url.into(),
            user_agent: user_agent.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    status: String,
    #[serde(rename = "cfClearance")]
    cf_clearance: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Solver for HttpSolver {
    async fn acquire(&self) -> Result<Solution> {
        let payload = json!({
            "userAgent": self.user_agent,
            "url": self.target_url,
            "apiKey": self.api_key,
        });
        let response = self
            .client
            .post(format!("{}/createTask", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("failed to reach solving API")?;
        if !response.status().is_success() {
            bail!("solving API rejected task creation: {}", response.status());
        }
        let task_id = response.text().await?.trim().to_string();

        for _ in 0..config::SOLVER_POLL_LIMIT {
            sleep(Duration::from_millis(config::SOLVER_POLL_MS)).await;

            let response = self
                .client
                .get(format!("{}/getTaskResult/{task_id}", self.base_url))
                .send()
                .await
                .context("failed to poll solving API")?;
            if !response.status().is_success() {
                bail!("solving API rejected result poll: {}", response.status());
            }
            let result: TaskResult = response.json().await?;
            match result.status.as_str() {
                "In Progress" => {}
                "Completed" => {
                    let token = result
                        .cf_clearance
                        .ok_or_else(|| anyhow!("completed task carried no clearance"))?;
                    return Ok(Solution {
                        token,
                        user_agent: self.user_agent.clone(),
                    });
                }
                "Failed" => {
                    bail!(
                        "solving task failed: {}",
                        result.error.unwrap_or_else(|| "unknown error".to_string())
                    );
                }
                other => bail!("solving API returned unknown status {other:?}"),
            }
        }

        bail!("solving task {task_id} timed out")
    }
}
