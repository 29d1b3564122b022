//! Named health checks and their combined verdict.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

/// Tag selecting the checks that gate readiness.
pub const READY_TAG: &str = "ready";

const RAISED: &str = "check raised";
const TIMED_OUT: &str = "timeout";

/// Result of one check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String, cause: Option<String> },
}

impl HealthCheckResult {
    pub fn degraded(reason: impl Into<String>) -> Self {
        HealthCheckResult::Degraded {
            reason: reason.into(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>, cause: Option<String>) -> Self {
        HealthCheckResult::Unhealthy {
            reason: reason.into(),
            cause,
        }
    }

    pub fn status(&self) -> HealthStatus {
        match self {
            HealthCheckResult::Healthy => HealthStatus::Healthy,
            HealthCheckResult::Degraded { .. } => HealthStatus::Degraded,
            HealthCheckResult::Unhealthy { .. } => HealthStatus::Unhealthy,
        }
    }
}

/// Ordered so that the worst status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A named probe of some dependency or of the process itself.
pub trait HealthCheck: Send + Sync {
    fn check(&self) -> BoxFuture<'_, HealthCheckResult>;
}

/// Adapter for plain closures.
struct FnCheck<F>(F);

impl<F> HealthCheck for FnCheck<F>
where
    F: Fn() -> HealthCheckResult + Send + Sync,
{
    fn check(&self) -> BoxFuture<'_, HealthCheckResult> {
        Box::pin(async move { (self.0)() })
    }
}

/// Per-registration options.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub tags: Vec<String>,
    /// Overrides the registry's default timeout.
    pub timeout: Option<Duration>,
}

impl CheckOptions {
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
struct Registration {
    name: String,
    check: Arc<dyn HealthCheck>,
    tags: BTreeSet<String>,
    timeout: Duration,
}

/// Per-check entry of a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub duration_ms: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Combined verdict plus per-check detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub total_duration_ms: f64,
    pub checks: BTreeMap<String, CheckReport>,
}

impl HealthReport {
    /// Healthy and Degraded are 200; Unhealthy is 503.
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// The set of registered checks.
pub struct HealthRegistry {
    checks: RwLock<Vec<Registration>>,
    default_timeout: Duration,
}

impl HealthRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            checks: RwLock::new(Vec::new()),
            default_timeout,
        }
    }

    /// Register an untagged check. A check with the same name is replaced.
    pub fn register(&self, name: impl Into<String>, check: impl HealthCheck + 'static) {
        self.register_with(name, check, CheckOptions::default());
    }

    /// Register a synchronous closure as a check.
    pub fn register_fn<F>(&self, name: impl Into<String>, options: CheckOptions, check: F)
    where
        F: Fn() -> HealthCheckResult + Send + Sync + 'static,
    {
        self.register_with(name, FnCheck(check), options);
    }

    pub fn register_with(
        &self,
        name: impl Into<String>,
        check: impl HealthCheck + 'static,
        options: CheckOptions,
    ) {
        let registration = Registration {
            name: name.into(),
            check: Arc::new(check),
            tags: options.tags.into_iter().collect(),
            timeout: options.timeout.unwrap_or(self.default_timeout),
        };

        let mut checks = self.checks.write().unwrap_or_else(|e| e.into_inner());
        checks.retain(|existing| existing.name != registration.name);
        tracing::debug!(check = %registration.name, tags = ?registration.tags, "Health check registered");
        checks.push(registration);
    }

    pub fn names(&self) -> Vec<String> {
        let checks = self.checks.read().unwrap_or_else(|e| e.into_inner());
        checks.iter().map(|r| r.name.clone()).collect()
    }

    /// Run every check carrying `tag` (all checks when `None`).
    pub async fn evaluate(&self, tag: Option<&str>) -> HealthReport {
        let selected: Vec<Registration> = {
            let checks = self.checks.read().unwrap_or_else(|e| e.into_inner());
            checks
                .iter()
                .filter(|r| tag.map_or(true, |t| r.tags.contains(t)))
                .cloned()
                .collect()
        };

        let started = Instant::now();
        let results = join_all(selected.iter().map(run_check)).await;

        let mut checks = BTreeMap::new();
        let mut overall = HealthStatus::Healthy;
        for (registration, (result, elapsed)) in selected.iter().zip(results) {
            overall = overall.max(result.status());
            if result != HealthCheckResult::Healthy {
                tracing::warn!(
                    check = %registration.name,
                    result = ?result,
                    "Health check not healthy"
                );
            }

            let status = result.status();
            let (reason, cause) = match result {
                HealthCheckResult::Healthy => (None, None),
                HealthCheckResult::Degraded { reason } => (Some(reason), None),
                HealthCheckResult::Unhealthy { reason, cause } => (Some(reason), cause),
            };
            checks.insert(
                registration.name.clone(),
                CheckReport {
                    status,
                    reason,
                    cause,
                    duration_ms: elapsed.as_secs_f64() * 1000.0,
                    tags: registration.tags.iter().cloned().collect(),
                },
            );
        }

        let warning = (overall == HealthStatus::Degraded).then(|| {
            let degraded: Vec<&str> = checks
                .iter()
                .filter(|(_, c)| c.status == HealthStatus::Degraded)
                .map(|(name, _)| name.as_str())
                .collect();
            format!("degraded checks: {}", degraded.join(", "))
        });

        HealthReport {
            status: overall,
            warning,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            checks,
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Run one check, converting panics and timeouts into Unhealthy.
async fn run_check(registration: &Registration) -> (HealthCheckResult, Duration) {
    let started = Instant::now();

    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| registration.check.check())) {
        Ok(future) => future,
        Err(panic) => return (raised(panic), started.elapsed()),
    };

    let result = match tokio::time::timeout(
        registration.timeout,
        AssertUnwindSafe(future).catch_unwind(),
    )
    .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => raised(panic),
        Err(_) => HealthCheckResult::unhealthy(
            TIMED_OUT,
            Some(format!("no result within {:?}", registration.timeout)),
        ),
    };
    (result, started.elapsed())
}

fn raised(payload: Box<dyn std::any::Any + Send>) -> HealthCheckResult {
    let cause = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    HealthCheckResult::unhealthy(RAISED, Some(cause))
}
