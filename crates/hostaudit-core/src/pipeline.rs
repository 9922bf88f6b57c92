//! Pipeline driver: runs probes in order and threads the id space through them.
//!
//! Each probe is invoked with the report's current `next_id`. A probe that
//! errors, panics, times out, or returns malformed items is recorded as failed
//! and leaves exactly one data marker behind. A probe that numbers its items
//! outside the range it was given stops the run; everything merged so far is
//! kept and the report is marked aborted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{MergeError, ProbeError, RunAbort};
use crate::probe::{Probe, ProbeResult};
use crate::report::Report;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Operator abort request, honored between probes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    /// Not started. Final state for probes skipped by cancellation or abort.
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Broke the id contract or ran out of ids; nothing it returned was merged.
    Rejected,
}

/// What happened to one probe during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub probe: String,
    /// Offset the probe was invoked with, if it was started.
    pub offset: Option<u64>,
    pub state: ProbeState,
    /// Items merged into the report, including a failure marker.
    pub items: usize,
    pub reason: Option<String>,
    pub marker_id: Option<u64>,
    pub elapsed_ms: u64,
}

impl ProbeOutcome {
    fn pending(probe: &str) -> Self {
        Self {
            probe: probe.to_string(),
            offset: None,
            state: ProbeState::Pending,
            items: 0,
            reason: None,
            marker_id: None,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub probes: Vec<ProbeOutcome>,
    /// Set when a probe broke the id contract, or ids ran out, and the run was stopped.
    pub fatal: Option<RunAbort>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn outcome(&self, probe: &str) -> Option<&ProbeOutcome> {
        self.probes.iter().find(|o| o.probe == probe)
    }

    pub fn count(&self, state: ProbeState) -> usize {
        self.probes.iter().filter(|o| o.state == state).count()
    }
}

pub struct Pipeline {
    probes: Vec<Arc<dyn Probe>>,
    log_path: PathBuf,
    default_timeout: Duration,
    timeouts: HashMap<String, Duration>,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(probes: Vec<Arc<dyn Probe>>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            probes,
            log_path: log_path.into(),
            default_timeout: DEFAULT_PROBE_TIMEOUT,
            timeouts: HashMap::new(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Override the timeout for one probe.
    pub fn with_timeout(mut self, probe: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(probe.into(), timeout);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn timeout_for(&self, probe: &str) -> Duration {
        self.timeouts
            .get(probe)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Run every probe once, in order, and return the merged report.
    pub async fn run(&self, host_id: &str, initial_offset: u64) -> RunOutcome {
        let mut report = Report::new(host_id, initial_offset);
        let mut outcomes: Vec<ProbeOutcome> =
            self.probes.iter().map(|p| ProbeOutcome::pending(p.name())).collect();
        let mut fatal = None;
        let mut cancelled = false;

        info!(
            host = host_id,
            offset = initial_offset,
            probes = self.probes.len(),
            "Starting inspection run"
        );

        for (probe, outcome) in self.probes.iter().zip(outcomes.iter_mut()) {
            if self.cancel.is_cancelled() {
                warn!(probe = probe.name(), "Run cancelled; remaining probes skipped");
                cancelled = true;
                break;
            }

            let offset = report.next_id();
            outcome.offset = Some(offset);
            outcome.state = ProbeState::Running;
            info!(probe = probe.name(), offset, "Running probe");

            let started = Instant::now();
            let result = self.invoke(probe, offset).await;
            outcome.elapsed_ms = started.elapsed().as_millis() as u64;

            let failure = match result {
                Ok(partial) => match report.merge_as(probe.name(), partial) {
                    Ok(merged) => {
                        outcome.state = ProbeState::Succeeded;
                        outcome.items = merged;
                        info!(probe = probe.name(), items = merged, "Probe succeeded");
                        None
                    }
                    Err(err) => match RunAbort::try_from(err) {
                        Ok(abort) => {
                            error!(probe = probe.name(), reason = %abort, "Aborting run");
                            outcome.state = ProbeState::Rejected;
                            outcome.reason = Some(abort.to_string());
                            report.mark_aborted(abort.to_string());
                            fatal = Some(abort);
                            break;
                        }
                        Err(MergeError::Malformed { error, .. }) => Some(ProbeError::Malformed(error).to_string()),
                        Err(other) => Some(other.to_string()),
                    },
                },
                Err(err) => Some(err.to_string()),
            };

            if let Some(reason) = failure {
                warn!(probe = probe.name(), reason = %reason, "Probe failed");
                match report.record_failure(probe.name(), &reason) {
                    Ok(marker) => {
                        outcome.state = ProbeState::Failed;
                        outcome.items = 1;
                        outcome.marker_id = Some(marker);
                        outcome.reason = Some(reason);
                    }
                    Err(exhausted) => {
                        error!(probe = probe.name(), reason = %exhausted, "No id left for the failure marker; aborting run");
                        outcome.state = ProbeState::Rejected;
                        outcome.reason = Some(format!("{}; {}", reason, exhausted));
                        report.mark_aborted(exhausted.to_string());
                        fatal = Some(RunAbort::Exhausted(exhausted));
                        break;
                    }
                }
            }
        }

        info!(
            items = report.len(),
            next_id = report.next_id(),
            aborted = fatal.is_some(),
            cancelled,
            "Inspection run finished"
        );

        RunOutcome {
            report,
            probes: outcomes,
            fatal,
            cancelled,
        }
    }

    /// Invoke one probe on its own task under its timeout.
    async fn invoke(&self, probe: &Arc<dyn Probe>, offset: u64) -> Result<ProbeResult, ProbeError> {
        let limit = self.timeout_for(probe.name());
        let task_probe = Arc::clone(probe);
        let log_path = self.log_path.clone();
        let mut handle =
            tokio::spawn(async move { task_probe.invoke(offset, &log_path).await });

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                Err(ProbeError::Panicked(panic_message(join.into_panic())))
            }
            Ok(Err(join)) => Err(ProbeError::Other(join.to_string())),
            Err(_) => {
                handle.abort();
                Err(ProbeError::Timeout(limit))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
