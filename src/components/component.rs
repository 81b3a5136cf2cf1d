//! # Component lifecycle state machine.
//!
//! A [`Component`] owns one [`ControlScope`] and drives one routine through
//! the scope's [`WorkerGroup`](crate::WorkerGroup).
//!
//! ## States
//! ```text
//!            start()                 stop()
//! Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
//!    │                                               │
//!    └──────────────── finalize() ◄──────────────────┘
//!                          ▼
//!                      Finalized (terminal, finalize() is a no-op)
//! ```
//!
//! ## Rules
//! - State lives in one atomic cell; no lock is held across `.await`.
//! - `start` on a non-stopped component fails with `AlreadyRunning`;
//!   `stop` on a non-running one fails with `NotRunning`. State is unchanged.
//! - `start` registers the routine before the state flips to `Running`, so
//!   `is_running()` never reports a routine that has not been scheduled.
//! - `stop` returns after the routine observed cancellation and exited.
//! - A restart renews the cancelled scope from the parent it was derived from.
//! - A future dropped mid-transition rolls the state back.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::components::ident::{Id, Kind, generate_id};
use crate::components::routine::{RoutineRef, WaitForCancel};
use crate::control::{ControlScope, PanicReport, ScopeToken, Worker, WorkerHandle};
use crate::error::{ComponentError, WorkError, component_info};

/// Lifecycle state of a [`Component`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Not running; `start` allowed.
    Stopped = 0,
    /// `start` in progress.
    Starting = 1,
    /// Routine registered and released.
    Running = 2,
    /// `stop` in progress.
    Stopping = 3,
    /// Terminal.
    Finalized = 4,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Stopped,
            1 => State::Starting,
            2 => State::Running,
            3 => State::Stopping,
            _ => State::Finalized,
        }
    }
}

/// # Uniform lifecycle contract.
///
/// Implemented by [`Component`]; higher-level orchestrators (device-tree
/// supervisors, [`ComponentSet`](crate::ComponentSet)) compose against it.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Component identity.
    fn id(&self) -> &Id;

    /// Component kind.
    fn kind(&self) -> &Kind;

    /// `true` while the component is running.
    fn is_running(&self) -> bool;

    /// Starts the component.
    async fn start(&self) -> Result<(), ComponentError>;

    /// Stops the component and waits for its routine to exit.
    async fn stop(&self) -> Result<(), ComponentError>;

    /// Waits for cancellation and for the worker group to drain; terminal.
    async fn finalize(&self) -> Result<(), ComponentError>;

    /// Label used in logs and errors: `(cmpt)[Kd:<kind>,Id:<id>]`.
    fn info(&self) -> String {
        component_info(self.kind().as_str(), self.id())
    }
}

/// Shared handle to any lifecycle implementation.
pub type LifecycleRef = Arc<dyn Lifecycle>;

/// Builder for [`Component`].
pub struct ComponentBuilder {
    kind: Kind,
    id: Option<Id>,
    scope: Option<ControlScope>,
    routine: Option<RoutineRef>,
}

impl ComponentBuilder {
    /// Sets an explicit identity (otherwise generated on first access).
    pub fn id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Uses the given scope (e.g. a fork of a parent's scope to share its group).
    pub fn scope(mut self, scope: ControlScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Creates a fresh scope derived from `parent`.
    pub fn parent(mut self, parent: &ScopeToken) -> Self {
        self.scope = Some(ControlScope::new(Some(parent)));
        self
    }

    /// Sets the routine (default: [`WaitForCancel`]).
    pub fn routine(mut self, routine: RoutineRef) -> Self {
        self.routine = Some(routine);
        self
    }

    /// Builds the component in the `Stopped` state.
    pub fn build(self) -> Component {
        let id = OnceLock::new();
        if let Some(explicit) = self.id {
            let _ = id.set(explicit);
        }
        let cpt = Component {
            id,
            kind: self.kind,
            state: AtomicU8::new(State::Stopped as u8),
            scope: self.scope.unwrap_or_default(),
            routine: self.routine.unwrap_or_else(|| Arc::new(WaitForCancel)),
            last_run: Mutex::new(None),
        };
        tracing::debug!(component = %cpt.info(), ctrl = ?cpt.scope, "component initialized");
        cpt
    }

    /// Builds the component as a shared handle.
    pub fn build_arc(self) -> Arc<Component> {
        Arc::new(self.build())
    }
}

/// Supervised runtime unit: identity, kind, one scope, one routine.
pub struct Component {
    id: OnceLock<Id>,
    kind: Kind,
    state: AtomicU8,
    scope: ControlScope,
    routine: RoutineRef,
    last_run: Mutex<Option<WorkerHandle>>,
}

impl Component {
    /// Starts building a component of the given kind.
    pub fn builder(kind: impl Into<Kind>) -> ComponentBuilder {
        ComponentBuilder {
            kind: kind.into(),
            id: None,
            scope: None,
            routine: None,
        }
    }

    /// Component of `kind` with a generated id, a fresh scope and the default routine.
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self::builder(kind).build()
    }

    /// The component's control scope.
    pub fn scope(&self) -> &ControlScope {
        &self.scope
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: State, to: State) -> Result<Transition<'_>, State> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Transition {
                state: &self.state,
                rollback: from,
                armed: true,
            })
            .map_err(State::from_u8)
    }
}

/// Restores the previous state if a transition future is dropped before completing.
struct Transition<'a> {
    state: &'a AtomicU8,
    rollback: State,
    armed: bool,
}

impl Transition<'_> {
    fn commit(mut self, to: State) {
        self.state.store(to as u8, Ordering::Release);
        self.armed = false;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.store(self.rollback as u8, Ordering::Release);
        }
    }
}

#[async_trait]
impl Lifecycle for Component {
    fn id(&self) -> &Id {
        self.id.get_or_init(|| generate_id(&self.kind))
    }

    fn kind(&self) -> &Kind {
        &self.kind
    }

    fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    async fn start(&self) -> Result<(), ComponentError> {
        let step = match self.transition(State::Stopped, State::Starting) {
            Ok(step) => step,
            Err(State::Finalized) => return Err(ComponentError::Finalized { info: self.info() }),
            Err(_) => return Err(ComponentError::AlreadyRunning { info: self.info() }),
        };

        if self.scope.renew() {
            tracing::debug!(component = %self.info(), "scope renewed for restart");
        }

        let worker = Arc::new(RoutineWorker {
            name: self.info(),
            routine: Arc::clone(&self.routine),
            ctx: self.scope.token(),
        });
        let group = self.scope.group();
        let handle = group.register_and_wait(worker).await;
        group.open();
        *self.last_run.lock() = Some(handle);

        step.commit(State::Running);
        tracing::debug!(component = %self.info(), "component started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let step = self
            .transition(State::Running, State::Stopping)
            .map_err(|_| ComponentError::NotRunning { info: self.info() })?;

        self.scope.cancel();
        self.scope.token().cancelled().await;
        let run = self.last_run.lock().take();
        if let Some(run) = run {
            run.finished().await;
        }

        step.commit(State::Stopped);
        tracing::debug!(component = %self.info(), "component stopped");
        Ok(())
    }

    async fn finalize(&self) -> Result<(), ComponentError> {
        if self.state() == State::Finalized {
            return Ok(());
        }

        let ctx = self.scope.token();
        ctx.cancelled().await;
        self.scope.group().wait_async().await;

        if let Some(cause) = ctx.cause() {
            let outcome = WorkError::from(cause);
            if !outcome.is_normal_exit() {
                tracing::warn!(component = %self.info(), error = %outcome, "finalized after failure");
            }
        }
        self.state.store(State::Finalized as u8, Ordering::Release);
        tracing::debug!(component = %self.info(), "component finalized");
        Ok(())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("info", &self.info())
            .field("state", &self.state())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Adapts a routine bound to one scope token into a group [`Worker`].
struct RoutineWorker {
    name: String,
    routine: RoutineRef,
    ctx: ScopeToken,
}

#[async_trait]
impl Worker for RoutineWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn work(&self) -> Result<(), WorkError> {
        self.routine.run(self.ctx.clone()).await
    }

    fn recover(&self, report: &PanicReport) {
        self.routine.recover(&self.name, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::components::routine::RoutineFn;

    #[tokio::test]
    async fn test_component_base() {
        let cpt = Component::builder("testKind").id("testId").build();
        assert_eq!(cpt.id().as_str(), "testId");
        assert_eq!(cpt.kind().as_str(), "testKind");
        assert!(!cpt.is_running());

        cpt.start().await.expect("start");
        assert!(cpt.is_running());

        cpt.stop().await.expect("stop");
        assert!(!cpt.is_running());

        cpt.finalize().await.expect("finalize");
        assert!(!cpt.is_running());
        assert_eq!(cpt.state(), State::Finalized);
        cpt.finalize().await.expect("finalize is idempotent");
    }

    #[tokio::test]
    async fn test_start_stop_start_toggles() {
        let cpt = Component::new("sensor");
        for _ in 0..3 {
            cpt.start().await.expect("start");
            assert!(cpt.is_running());
            cpt.stop().await.expect("stop");
            assert!(!cpt.is_running());
        }
    }

    #[tokio::test]
    async fn test_double_start_fails_and_keeps_state() {
        let cpt = Component::new("sensor");
        cpt.start().await.expect("start");
        let err = cpt.start().await.expect_err("second start");
        assert!(matches!(err, ComponentError::AlreadyRunning { .. }));
        assert!(cpt.is_running());
        cpt.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let cpt = Component::new("actuator");
        let err = cpt.stop().await.expect_err("stop on stopped");
        assert!(matches!(err, ComponentError::NotRunning { .. }));
        assert_eq!(err.as_label(), "component_not_running");
    }

    #[tokio::test]
    async fn test_start_after_finalize_fails() {
        let cpt = Component::new("actuator");
        cpt.scope().cancel();
        cpt.finalize().await.expect("finalize");
        let err = cpt.start().await.expect_err("start after finalize");
        assert!(matches!(err, ComponentError::Finalized { .. }));
    }

    #[tokio::test]
    async fn test_generated_id_is_stable() {
        let cpt = Component::new("controller");
        let first = cpt.id().clone();
        assert_eq!(cpt.id(), &first);
        assert!(cpt.info().contains("Kd:controller"));
    }

    #[tokio::test]
    async fn test_stop_waits_for_routine_exit() {
        let exited = Arc::new(AtomicUsize::new(0));
        let seen = exited.clone();
        let cpt = Component::builder("slow")
            .routine(RoutineFn::arc(move |ctx: ScopeToken| {
                let seen = seen.clone();
                async move {
                    ctx.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), WorkError>(())
                }
            }))
            .build();

        cpt.start().await.expect("start");
        cpt.stop().await.expect("stop");
        assert_eq!(exited.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_panicking_routine_does_not_break_lifecycle() {
        let cpt = Component::builder("faulty")
            .routine(RoutineFn::arc(|_ctx: ScopeToken| async move {
                panic!("driver fault");
                Ok::<(), WorkError>(())
            }))
            .build();

        cpt.start().await.expect("start");
        cpt.stop().await.expect("stop");
        cpt.finalize().await.expect("finalize");
        assert_eq!(cpt.scope().group().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_forked_components_share_group() {
        let root = ControlScope::new(None);
        let a = Component::builder("sensor").scope(root.fork()).build();
        let b = Component::builder("sensor").scope(root.fork()).build();

        a.start().await.expect("start a");
        b.start().await.expect("start b");
        assert_eq!(root.group().in_flight(), 2);

        root.cancel();
        a.finalize().await.expect("finalize a");
        b.finalize().await.expect("finalize b");
        assert_eq!(root.group().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_parent_cancel_then_finalize() {
        let parent = ScopeToken::root();
        let cpt = Component::builder("sensor").parent(&parent).build();
        cpt.start().await.expect("start");
        parent.cancel();
        cpt.finalize().await.expect("finalize");
        assert_eq!(cpt.state(), State::Finalized);
    }

    #[tokio::test]
    async fn test_stop_keeps_parent_failure_cause() {
        let parent = ScopeToken::root();
        let cpt = Component::builder("actuator").parent(&parent).build();
        cpt.start().await.expect("start");

        parent.cancel_with("bus fault");
        cpt.stop().await.expect("stop");
        assert_eq!(
            cpt.scope().token().cause(),
            Some(crate::control::CancelCause::Failed("bus fault".into()))
        );
        cpt.finalize().await.expect("finalize");
    }
}
