//! Fan-out executor - runs one operation per device with bounded parallelism.
//!
//! Results come back in input order, one slot per target. A failure, panic or
//! timeout in one slot never touches another.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::attrs::AttributeSet;
use crate::audit::{AuditLogger, FleetEvent, Operation, OutcomeClass};
use crate::error::{FleetError, Result};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::resource::ResourceDescriptor;
use crate::transport::DeviceTarget;

/// Default per-task timeout: one device round trip with headroom.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);

/// Parallelism used when the platform cannot report it.
const FALLBACK_PARALLELISM: usize = 4;

/// Fan-out limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Maximum operations in flight at once.
    pub max_parallel: usize,
    /// Time allowed for each target's operation.
    #[serde(rename = "task_timeout_secs", deserialize_with = "secs")]
    pub task_timeout: Duration,
}

fn secs<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_secs)
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_PARALLELISM),
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl FanoutConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(FleetError::invalid_argument("max_parallel must be at least 1"));
        }
        if self.task_timeout.is_zero() {
            return Err(FleetError::invalid_argument("task timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Result for one target.
#[derive(Debug)]
pub struct TargetOutcome<T> {
    pub target: DeviceTarget,
    pub result: Result<T>,
}

/// Ordered per-target results; entry `i` belongs to input target `i`.
#[derive(Debug)]
pub struct ClusterOutcome<T> {
    entries: Vec<TargetOutcome<T>>,
}

impl<T> ClusterOutcome<T> {
    pub(crate) fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetOutcome<T>> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&TargetOutcome<T>> {
        self.entries.get(index)
    }

    /// Targets whose operation succeeded, in input order.
    pub fn succeeded(&self) -> impl Iterator<Item = (&DeviceTarget, &T)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|v| (&e.target, v)))
    }

    /// Targets whose operation failed, in input order.
    pub fn failed(&self) -> impl Iterator<Item = (&DeviceTarget, &FleetError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (&e.target, err)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    pub fn into_entries(self) -> Vec<TargetOutcome<T>> {
        self.entries
    }

    pub(crate) fn map_err(self, f: impl Fn(FleetError) -> FleetError) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|e| TargetOutcome {
                    target: e.target,
                    result: e.result.map_err(&f),
                })
                .collect(),
        }
    }
}

impl<T> IntoIterator for ClusterOutcome<T> {
    type Item = TargetOutcome<T>;
    type IntoIter = std::vec::IntoIter<TargetOutcome<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Runs per-device operations concurrently.
#[derive(Clone)]
pub struct FanoutExecutor {
    config: FanoutConfig,
    audit: Arc<AuditLogger>,
}

impl FanoutExecutor {
    pub fn new(config: FanoutConfig, audit: Arc<AuditLogger>) -> Self {
        Self { config, audit }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Run `op` once per target.
    ///
    /// Fails as a whole only for invalid input (no targets, zero
    /// parallelism). Everything else is reported in the target's slot.
    pub async fn run<F, Fut, T>(
        &self,
        op_name: &str,
        targets: &[DeviceTarget],
        op: F,
    ) -> Result<ClusterOutcome<T>>
    where
        F: Fn(DeviceTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if targets.is_empty() {
            return Err(FleetError::invalid_argument("fan-out needs at least one target"));
        }
        self.config.validate()?;

        debug!(
            operation = op_name,
            targets = targets.len(),
            max_parallel = self.config.max_parallel,
            timeout_ms = self.config.task_timeout.as_millis() as u64,
            "Starting fan-out"
        );

        // More permits than targets buys nothing, and keeps us under MAX_PERMITS.
        let permits = self.config.max_parallel.min(targets.len());
        let semaphore = Arc::new(Semaphore::new(permits));
        let op = Arc::new(op);
        let timeout = self.config.task_timeout;

        let handles: Vec<_> = targets
            .iter()
            .cloned()
            .map(|target| {
                let semaphore = Arc::clone(&semaphore);
                let op = Arc::clone(&op);
                let audit = Arc::clone(&self.audit);
                let op_name = op_name.to_string();
                tokio::spawn(async move {
                    // Never closed, so acquisition only fails if the executor is torn down.
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| FleetError::TaskAborted(e.to_string()))?;
                    let started = Instant::now();
                    let result = run_slot(op(target.clone()), timeout).await;
                    let outcome = match &result {
                        Ok(_) => OutcomeClass::Succeeded,
                        Err(e) => OutcomeClass::from_error(e),
                    };
                    audit.record(
                        FleetEvent::new(Operation::FanoutTask, target.name(), started.elapsed(), outcome)
                            .resource(op_name),
                    );
                    result
                })
            })
            .collect();

        let mut entries = Vec::with_capacity(targets.len());
        for (target, handle) in targets.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(device = %target, error = %e, "Fan-out worker failed");
                    Err(FleetError::TaskAborted(e.to_string()))
                }
            };
            entries.push(TargetOutcome {
                target: target.clone(),
                result,
            });
        }

        Ok(ClusterOutcome { entries })
    }

    /// Reconcile the same desired state on every target.
    pub async fn ensure(
        &self,
        reconciler: &Reconciler,
        targets: &[DeviceTarget],
        descriptor: &ResourceDescriptor,
        desired: &AttributeSet,
    ) -> Result<ClusterOutcome<ReconcileOutcome>> {
        // Validate identity once so bad input fails before any device is touched.
        descriptor.identity().key_from(desired)?;

        let reconciler = reconciler.clone();
        let descriptor = Arc::new(descriptor.clone());
        let desired = Arc::new(desired.clone());
        let label = format!("ensure {}", descriptor.path());

        self.run(&label, targets, move |target| {
            let reconciler = reconciler.clone();
            let descriptor = Arc::clone(&descriptor);
            let desired = Arc::clone(&desired);
            async move { reconciler.ensure(&target, &descriptor, &desired).await }
        })
        .await
    }
}

/// Run one operation under the timeout.
///
/// The operation gets its own task; on timeout we stop waiting for it but
/// leave it running, so an in-flight request may still land on the device.
async fn run_slot<Fut, T>(fut: Fut, timeout: Duration) -> Result<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(fut);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(FleetError::TaskAborted(panic_message(join_err))),
        Err(_) => Err(FleetError::TaskTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
