//! # Component routines.
//!
//! A [`Routine`] is the strategy a component runs while it is started. It
//! receives the component's current [`ScopeToken`] and must return once the
//! token is cancelled.
//!
//! - [`WaitForCancel`] - default: block until cancellation.
//! - [`RoutineFn`] - closure-backed routine, a fresh future per start.
//!
//! ## Exit semantics
//! ```text
//! Ok(())                       → normal exit
//! Err(Canceled | Deadline..)   → normal exit (logged at debug)
//! Err(Fail)                    → logged as a failure by the worker group
//! panic                        → Routine::recover(), counted as finished
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::control::{CancelCause, PanicReport, ScopeToken};
use crate::error::WorkError;

/// # Cancelable work strategy of a component.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use unitvisor::{Routine, ScopeToken, WorkError};
///
/// struct Poll;
///
/// #[async_trait]
/// impl Routine for Poll {
///     async fn run(&self, ctx: ScopeToken) -> Result<(), WorkError> {
///         while !ctx.is_cancelled() {
///             // read the sensor...
///             tokio::task::yield_now().await;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Routine: Send + Sync + 'static {
    /// Runs until completion or until `ctx` is cancelled.
    async fn run(&self, ctx: ScopeToken) -> Result<(), WorkError>;

    /// Called when [`Routine::run`] panicked. The default logs the report.
    fn recover(&self, component: &str, report: &PanicReport) {
        tracing::warn!(
            component,
            panic = %report.message,
            "worker recover"
        );
    }
}

/// Shared handle to a routine.
pub type RoutineRef = Arc<dyn Routine>;

/// Default routine: waits for cancellation.
///
/// Plain cancellation and deadline are normal completion; a scope cancelled
/// with a reason (`cancel_with`) returns that reason as [`WorkError::Fail`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitForCancel;

#[async_trait]
impl Routine for WaitForCancel {
    async fn run(&self, ctx: ScopeToken) -> Result<(), WorkError> {
        ctx.cancelled().await;
        match ctx.cause() {
            Some(CancelCause::DeadlineExceeded) => {
                tracing::debug!("work timeout");
                Ok(())
            }
            Some(cause @ CancelCause::Failed(_)) => Err(cause.into()),
            _ => Ok(()),
        }
    }
}

/// Function-backed routine.
///
/// Wraps a closure that *creates* a new future per start; share state
/// between runs explicitly with `Arc<...>` inside the closure.
///
/// ## Example
/// ```rust
/// use unitvisor::{RoutineFn, RoutineRef, ScopeToken, WorkError};
///
/// let r: RoutineRef = RoutineFn::arc(|ctx: ScopeToken| async move {
///     ctx.cancelled().await;
///     Ok::<_, WorkError>(())
/// });
/// # let _ = r;
/// ```
#[derive(Debug)]
pub struct RoutineFn<F> {
    f: F,
}

impl<F> RoutineFn<F> {
    /// Creates a new function-backed routine.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the routine and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Routine for RoutineFn<F>
where
    F: Fn(ScopeToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    async fn run(&self, ctx: ScopeToken) -> Result<(), WorkError> {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::control::ControlScope;

    #[tokio::test]
    async fn test_wait_for_cancel_plain_cancel_is_ok() {
        let scope = ControlScope::new(None);
        let token = scope.token();
        let run = tokio::spawn(async move { WaitForCancel.run(token).await });
        scope.cancel();
        assert_eq!(run.await.expect("join"), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cancel_deadline_is_ok() {
        let scope = ControlScope::new(None).fork_with_timeout(Duration::from_millis(30));
        assert_eq!(WaitForCancel.run(scope.token()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_wait_for_cancel_reason_is_failure() {
        let scope = ControlScope::new(None);
        scope.cancel_with("bus fault");
        assert_eq!(
            WaitForCancel.run(scope.token()).await,
            Err(WorkError::fail("bus fault"))
        );
    }

    #[tokio::test]
    async fn test_routine_fn_runs_closure() {
        let r = RoutineFn::arc(|ctx: ScopeToken| async move {
            if ctx.is_cancelled() {
                return Err(WorkError::Canceled);
            }
            Ok(())
        });
        let token = ScopeToken::root();
        assert_eq!(r.run(token.clone()).await, Ok(()));
        token.cancel();
        assert_eq!(r.run(token).await, Err(WorkError::Canceled));
    }
}
