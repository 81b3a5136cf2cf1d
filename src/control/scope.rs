//! # Cancellable scopes.
//!
//! [`ScopeToken`] wraps a [`CancellationToken`] and remembers **why** it was
//! cancelled ([`CancelCause`]). [`ControlScope`] pairs the current token with a
//! shared [`WorkerGroup`].
//!
//! ## Architecture
//! ```text
//! ControlScope::new(None)          (root token, new WorkerGroup)
//!   ├─► fork()                     (child token, same WorkerGroup)
//!   │     └─► fork_with_timeout(d) (grandchild, self-cancels after d)
//!   └─► fork()
//!
//! cancel(parent) ──► every descendant token observes cancellation
//! ```
//!
//! ## Rules
//! - Cancelling is idempotent and safe from any task.
//! - The first recorded cause wins; a child cancelled through its parent
//!   reports the parent's cause.
//! - Descendants share the group, not the token: cancelling a child never
//!   touches its parent.
//! - Locks guard only the swap/read of the current token.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::control::group::WorkerGroup;
use crate::error::WorkError;

/// Why a scope was cancelled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelCause {
    /// Explicit cancellation (`cancel()` on the scope or an ancestor).
    Canceled,
    /// The scope (or an ancestor) reached its deadline.
    DeadlineExceeded,
    /// Cancelled with an error reason through `cancel_with`.
    Failed(Arc<str>),
}

impl From<CancelCause> for WorkError {
    fn from(cause: CancelCause) -> Self {
        match cause {
            CancelCause::Canceled => WorkError::Canceled,
            CancelCause::DeadlineExceeded => WorkError::DeadlineExceeded,
            CancelCause::Failed(reason) => WorkError::Fail {
                error: reason.to_string(),
            },
        }
    }
}

struct TokenInner {
    token: CancellationToken,
    cause: OnceLock<CancelCause>,
    deadline: Option<Instant>,
    parent: Option<ScopeToken>,
}

/// Cloneable cancellation handle with a recorded cause.
///
/// Clones share state: cancelling one clone cancels all of them.
/// A token keeps its ancestors alive (the cause lookup walks up the chain).
#[derive(Clone)]
pub struct ScopeToken {
    inner: Arc<TokenInner>,
}

impl ScopeToken {
    /// Creates a root token with no parent.
    pub fn root() -> Self {
        Self::build(CancellationToken::new(), None, None)
    }

    fn build(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<ScopeToken>,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                token,
                cause: OnceLock::new(),
                deadline,
                parent,
            }),
        }
    }

    /// Derives a child token: cancelled when `self` is cancelled, never the reverse.
    pub fn child(&self) -> Self {
        let deadline = self.inner.deadline;
        Self::build(self.inner.token.child_token(), deadline, Some(self.clone()))
    }

    /// Derives a child token that also cancels itself after `d`
    /// with [`CancelCause::DeadlineExceeded`].
    ///
    /// Must be called within a Tokio runtime (the deadline is a spawned timer).
    pub fn child_with_timeout(&self, d: Duration) -> Self {
        let own = Instant::now() + d;
        let deadline = match self.inner.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        let child = Self::build(
            self.inner.token.child_token(),
            Some(deadline),
            Some(self.clone()),
        );

        let timed = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(own) => timed.cancel_because(CancelCause::DeadlineExceeded),
                _ = timed.cancelled() => {}
            }
        });
        child
    }

    /// Cancels with [`CancelCause::Canceled`]. Idempotent.
    pub fn cancel(&self) {
        self.cancel_because(CancelCause::Canceled);
    }

    /// Cancels with [`CancelCause::Failed`]. Idempotent; an earlier cause is kept.
    pub fn cancel_with(&self, reason: impl Into<Arc<str>>) {
        self.cancel_because(CancelCause::Failed(reason.into()));
    }

    fn cancel_because(&self, cause: CancelCause) {
        // Already cancelled (here or through an ancestor): keep the first cause.
        if self.inner.token.is_cancelled() {
            return;
        }
        let _ = self.inner.cause.set(cause);
        self.inner.token.cancel();
    }

    /// `true` once this token or an ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Completes when the token is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }

    /// Returns the cancellation cause, or `None` while the token is live.
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.is_cancelled() {
            return None;
        }
        let mut cur = Some(self);
        while let Some(tok) = cur {
            if let Some(cause) = tok.inner.cause.get() {
                return Some(cause.clone());
            }
            cur = tok.inner.parent.as_ref();
        }
        Some(CancelCause::Canceled)
    }

    /// Earliest deadline of this token and its ancestors, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Underlying tokio token (for APIs that take a plain [`CancellationToken`]).
    pub fn as_cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl Default for ScopeToken {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeToken")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.cause())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

/// Where the current token came from; used to renew a cancelled scope.
#[derive(Clone)]
struct Origin {
    parent: Option<ScopeToken>,
    timeout: Option<Duration>,
}

impl Origin {
    fn derive(&self) -> ScopeToken {
        let parent = self.parent.clone().unwrap_or_default();
        match self.timeout {
            Some(d) => parent.child_with_timeout(d),
            None if self.parent.is_some() => parent.child(),
            None => parent,
        }
    }
}

/// Control structure of a component: current cancellation token plus a shared worker group.
///
/// A `ControlScope` is never copied; forks get a new token and a reference
/// to the **same** [`WorkerGroup`], so one [`WorkerGroup::open`] releases
/// every worker registered through any scope of the tree.
///
/// # Shared gate
/// Two unrelated subtrees forked from one parent share a gate. If only one of
/// them opens it, workers registered by the other stay parked until someone
/// does. Open the gate once per generation from a single owner.
pub struct ControlScope {
    current: RwLock<ScopeToken>,
    origin: RwLock<Origin>,
    group: Arc<WorkerGroup>,
}

impl ControlScope {
    /// Creates a scope with a fresh [`WorkerGroup`], derived from `parent` when given.
    pub fn new(parent: Option<&ScopeToken>) -> Self {
        Self::with_group(parent, Arc::new(WorkerGroup::new()))
    }

    /// Creates a scope over an existing group.
    pub fn with_group(parent: Option<&ScopeToken>, group: Arc<WorkerGroup>) -> Self {
        let origin = Origin {
            parent: parent.cloned(),
            timeout: None,
        };
        Self {
            current: RwLock::new(origin.derive()),
            origin: RwLock::new(origin),
            group,
        }
    }

    fn from_origin(origin: Origin, group: Arc<WorkerGroup>) -> Self {
        Self {
            current: RwLock::new(origin.derive()),
            origin: RwLock::new(origin),
            group,
        }
    }

    /// Cancels the current token. Idempotent.
    pub fn cancel(&self) {
        self.current.read().cancel();
    }

    /// Cancels the current token with an error reason.
    pub fn cancel_with(&self, reason: impl Into<Arc<str>>) {
        self.current.read().cancel_with(reason);
    }

    /// Returns a clone of the current token.
    pub fn token(&self) -> ScopeToken {
        self.current.read().clone()
    }

    /// Returns the shared worker group.
    pub fn group(&self) -> Arc<WorkerGroup> {
        Arc::clone(&self.group)
    }

    /// Child scope: same group, token derived from the current one.
    pub fn fork(&self) -> ControlScope {
        let origin = Origin {
            parent: Some(self.token()),
            timeout: None,
        };
        Self::from_origin(origin, self.group())
    }

    /// Child scope that also cancels itself after `d`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn fork_with_timeout(&self, d: Duration) -> ControlScope {
        let origin = Origin {
            parent: Some(self.token()),
            timeout: Some(d),
        };
        Self::from_origin(origin, self.group())
    }

    /// Replaces the current token with a child of `source`.
    ///
    /// The outgoing token is not cancelled; a routine still waiting on it is
    /// detached from this scope. Stop the owning component first.
    pub fn replace_with(&self, source: &ScopeToken) {
        self.replace(Origin {
            parent: Some(source.clone()),
            timeout: None,
        });
    }

    /// Replaces the current token with a child of `source` that expires after `d`.
    pub fn replace_with_timeout(&self, source: &ScopeToken, d: Duration) {
        self.replace(Origin {
            parent: Some(source.clone()),
            timeout: Some(d),
        });
    }

    fn replace(&self, origin: Origin) {
        let token = origin.derive();
        *self.origin.write() = origin;
        *self.current.write() = token;
    }

    /// Replaces a cancelled token with a fresh one derived from the same origin.
    ///
    /// No-op while the current token is live. Returns `true` if a new token was installed.
    pub fn renew(&self) -> bool {
        let mut current = self.current.write();
        if !current.is_cancelled() {
            return false;
        }
        *current = self.origin.read().derive();
        true
    }
}

impl Default for ControlScope {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for ControlScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.token();
        write!(
            f,
            "(ctrl)[cancelled:{};cause:{:?};wg:{:?}]",
            token.is_cancelled(),
            token.cause(),
            self.group
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let scope = ControlScope::new(None);
        scope.cancel();
        scope.cancel();
        assert!(scope.token().is_cancelled());
        assert_eq!(scope.token().cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates_to_forks() {
        let parent = ControlScope::new(None);
        let child = parent.fork();
        let grandchild = child.fork();

        parent.cancel();
        grandchild.token().cancelled().await;
        assert!(child.token().is_cancelled());
        assert_eq!(grandchild.token().cause(), Some(CancelCause::Canceled));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_touch_parent() {
        let parent = ControlScope::new(None);
        let child = parent.fork();
        child.cancel();
        assert!(!parent.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_forks_share_group() {
        let parent = ControlScope::new(None);
        let child = parent.fork();
        assert!(Arc::ptr_eq(&parent.group(), &child.group()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fork_with_timeout_reports_deadline() {
        let parent = ControlScope::new(None);
        let timed = parent.fork_with_timeout(Duration::from_millis(50));
        let token = timed.token();
        assert!(token.deadline().is_some());

        token.cancelled().await;
        assert_eq!(token.cause(), Some(CancelCause::DeadlineExceeded));
        assert!(!parent.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_propagates_to_children() {
        let scope = ControlScope::new(None).fork_with_timeout(Duration::from_millis(10));
        let child = scope.fork();
        child.token().cancelled().await;
        assert_eq!(child.token().cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let scope = ControlScope::new(None);
        scope.cancel_with("sensor offline");
        scope.cancel();
        assert_eq!(
            scope.token().cause(),
            Some(CancelCause::Failed(Arc::from("sensor offline")))
        );
    }

    #[tokio::test]
    async fn test_inherited_cause_survives_local_cancel() {
        let parent = ControlScope::new(None);
        let child = parent.fork();

        parent.cancel_with("bus fault");
        child.cancel();
        child.cancel_with("late reason");

        let failed = Some(CancelCause::Failed(Arc::from("bus fault")));
        assert_eq!(child.token().cause(), failed);
        assert_eq!(parent.token().cause(), failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cause_survives_local_cancel() {
        let timed = ControlScope::new(None).fork_with_timeout(Duration::from_millis(10));
        let child = timed.fork();
        child.token().cancelled().await;

        child.cancel();
        assert_eq!(child.token().cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_renew_after_cancel() {
        let root = ScopeToken::root();
        let scope = ControlScope::new(Some(&root));
        assert!(!scope.renew());

        scope.cancel();
        assert!(scope.renew());
        assert!(!scope.token().is_cancelled());

        root.cancel();
        assert!(scope.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_replace_with_source() {
        let scope = ControlScope::new(None);
        let old = scope.token();
        let source = ScopeToken::root();
        scope.replace_with(&source);

        source.cancel();
        assert!(scope.token().is_cancelled());
        assert!(!old.is_cancelled());
    }

    #[test]
    fn test_cause_maps_to_work_error() {
        assert_eq!(WorkError::from(CancelCause::Canceled), WorkError::Canceled);
        assert_eq!(
            WorkError::from(CancelCause::Failed(Arc::from("x"))),
            WorkError::fail("x")
        );
    }
}
