//! # Worker group with a gated fan-out start.
//!
//! [`WorkerGroup`] decouples **"register N workers"** from **"release all N"**,
//! so a tree of components can be fully prepared before any of them begins
//! work, then started together as one generation.
//!
//! ## Architecture
//! ```text
//! register_and_wait(w1) ─┐                      ┌─► w1.work()
//! register_and_wait(w2) ─┼─► [ gate (closed) ] ─┼─► w2.work()
//! register_and_wait(wN) ─┘         ▲            └─► wN.work()
//!                                  │
//!                               open()
//!
//! wait_async(): in-flight == 0 ─► retire gate ─► next generation
//! ```
//!
//! ## Rules
//! - Registration and `wait_async` are serialized (no add-after-wait race).
//! - The gate is created lazily on the first registration of a generation
//!   and opened at most once; workers registered after `open` run immediately.
//! - A panicking worker is recovered through [`Worker::recover`], logged,
//!   and counted as finished. Panics never reach the caller of `start`.
//! - Work failures are logged here; propagation policy belongs to the caller.
//! - A gate nobody opens parks its workers forever, and `wait_async` with them.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::WorkError;

/// Panic payload, rendered to a bounded message.
#[derive(Clone, Debug)]
pub struct PanicReport {
    /// Panic message, truncated to the group's report limit.
    pub message: String,
}

impl PanicReport {
    /// Renders `payload` (`&str` / `String` panics) and truncates it to `limit` bytes.
    pub fn from_payload(payload: &(dyn Any + Send), limit: usize) -> Self {
        let raw = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            message: truncate(raw, limit),
        }
    }
}

fn truncate(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut cut = limit;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Unit of work driven by a [`WorkerGroup`].
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the worker to completion.
    async fn work(&self) -> Result<(), WorkError>;

    /// Called when [`Worker::work`] panicked. The default logs the report.
    fn recover(&self, report: &PanicReport) {
        tracing::warn!(
            worker = self.name(),
            panic = %report.message,
            "worker recovered from panic"
        );
    }
}

/// Shared handle to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// Handle to one registered worker; reports when its task has finished.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
    finished: CancellationToken,
}

impl WorkerHandle {
    /// `true` once the worker's task has exited (normally, with an error or by panic).
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Completes once the worker's task has exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }
}

/// In-flight tracker with a per-generation start gate.
///
/// Shared by reference (`Arc`) across a whole tree of forked scopes; never copied.
pub struct WorkerGroup {
    tracker: TaskTracker,
    gate: Mutex<Option<CancellationToken>>,
    wait_lock: tokio::sync::Mutex<()>,
    panic_limit: usize,
}

impl WorkerGroup {
    /// Creates an empty group with the default panic report limit.
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Creates an empty group using [`Config::panic_report_limit`].
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tracker: TaskTracker::new(),
            gate: Mutex::new(None),
            wait_lock: tokio::sync::Mutex::new(()),
            panic_limit: cfg.panic_report_limit,
        }
    }

    /// Registers `worker` and spawns its task, parked on the current generation's gate.
    ///
    /// Must be called within a Tokio runtime. Waits while a concurrent
    /// [`WorkerGroup::wait_async`] is draining the previous generation.
    pub async fn register_and_wait(&self, worker: WorkerRef) -> WorkerHandle {
        let _serial = self.wait_lock.lock().await;
        let gate = self
            .gate
            .lock()
            .get_or_insert_with(CancellationToken::new)
            .clone();

        let finished = CancellationToken::new();
        let guard = finished.clone().drop_guard();
        let limit = self.panic_limit;

        self.tracker.spawn(async move {
            let _finished = guard;
            tokio::task::yield_now().await;
            gate.cancelled().await;
            tokio::task::yield_now().await;

            match AssertUnwindSafe(worker.work()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_normal_exit() => {
                    tracing::debug!(worker = worker.name(), reason = %e, "worker exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        worker = worker.name(),
                        error = %e,
                        label = e.as_label(),
                        "worker failed"
                    );
                }
                Err(payload) => {
                    worker.recover(&PanicReport::from_payload(payload.as_ref(), limit));
                }
            }
        });

        WorkerHandle { finished }
    }

    /// Opens the current generation's gate, releasing every parked worker. Idempotent.
    pub fn open(&self) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.cancel();
        }
    }

    /// `true` if the current generation's gate exists and is open.
    pub fn is_open(&self) -> bool {
        self.gate
            .lock()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Number of registered workers that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every registered worker has finished, then retires the generation.
    ///
    /// Never returns while workers are parked on an unopened gate.
    pub async fn wait_async(&self) {
        let _serial = self.wait_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        let mut gate = self.gate.lock();
        if gate.as_ref().is_some_and(CancellationToken::is_cancelled) {
            *gate = None;
        }
    }
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gate = self.gate.lock().as_ref().map(CancellationToken::is_cancelled);
        write!(
            f,
            "wg:{{in_flight:{}}},startWaiting:{},startChanClosed:{}",
            self.tracker.len(),
            gate.is_some(),
            gate.unwrap_or(false)
        )
    }
}
