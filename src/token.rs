//! # CompletionToken: resettable one-shot handoff between tasks.
//!
//! A producer resolves a generation with [`CompletionToken::completed`]
//! (success) or [`CompletionToken::set_err`] (failure); consumers block in
//! [`CompletionToken::wait`] / [`CompletionToken::wait_timeout`] or select on
//! [`CompletionToken::done`].
//!
//! ## Rules
//! - **First waiter wins**: `completed` hands success to exactly one waiter,
//!   the earliest one still blocked, then closes the generation. Every other
//!   waiter of that generation (current or later) gets `false`.
//! - **Failure is broadcast**: `set_err` closes the generation; all waiters get `false`.
//! - **Read-once error**: `err` returns the recorded error and clears it.
//! - **Reset releases stragglers**: `reset` closes the outgoing generation
//!   before starting a fresh one, so no waiter is left parked.
//!
//! ## Generation flow
//! ```text
//!  wait() ──► queue [w1, w2] ◄── completed(): pop w1 ─► send ─► close
//!                  │                                   w1: true, w2: false
//!  set_err(e) ─────┴─► close ─► every waiter: false, err() = Some(e)
//!  reset() ──► close(old) ─► new generation, err cleared
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::TokenError;
use crate::timers::{TimerPool, TimerRef};

struct Generation {
    closed: CancellationToken,
    waiters: Mutex<VecDeque<oneshot::Sender<()>>>,
    arrived: Notify,
}

impl Generation {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: CancellationToken::new(),
            waiters: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        })
    }

    /// Queues a waiter; `None` once the generation is closed.
    fn enqueue(&self) -> Option<oneshot::Receiver<()>> {
        let rx = {
            let mut queue = self.waiters.lock();
            // Checked under the queue lock so `close` cannot miss this waiter.
            if self.closed.is_cancelled() {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            queue.push_back(tx);
            rx
        };
        self.arrived.notify_one();
        Some(rx)
    }

    async fn wait(&self) -> bool {
        let Some(mut rx) = self.enqueue() else {
            return false;
        };
        tokio::select! {
            biased;
            handed = &mut rx => handed.is_ok(),
            // `complete` sends before closing; a handoff may already be buffered.
            _ = self.closed.cancelled() => rx.try_recv().is_ok(),
        }
    }

    async fn complete(&self) {
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            {
                let mut queue = self.waiters.lock();
                if self.closed.is_cancelled() {
                    return;
                }
                // Waiters that gave up (timeout, dropped future) are skipped.
                while let Some(tx) = queue.pop_front() {
                    if tx.send(()).is_ok() {
                        drop(queue);
                        self.close();
                        return;
                    }
                }
            }

            tokio::select! {
                _ = arrived => {}
                _ = self.closed.cancelled() => return,
            }
        }
    }

    fn close(&self) {
        let mut queue = self.waiters.lock();
        self.closed.cancel();
        queue.clear();
    }

    fn blocked(&self) -> usize {
        self.waiters.lock().iter().filter(|tx| !tx.is_closed()).count()
    }
}

struct State {
    generation: Arc<Generation>,
    err: Option<TokenError>,
}

/// Resettable single-shot success/failure signal.
///
/// Share it between producer and consumers with `Arc<CompletionToken>`.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use unitvisor::CompletionToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = Arc::new(CompletionToken::new());
/// let waiter = {
///     let token = Arc::clone(&token);
///     tokio::spawn(async move { token.wait().await })
/// };
/// token.completed().await;
/// assert!(waiter.await.unwrap());
/// # }
/// ```
pub struct CompletionToken {
    state: Mutex<State>,
    timers: TimerRef,
}

impl CompletionToken {
    /// Creates a token with its own timer pool.
    pub fn new() -> Self {
        Self::with_timers(TimerPool::shared())
    }

    /// Creates a token drawing `wait_timeout` timers from `timers`.
    pub fn with_timers(timers: TimerRef) -> Self {
        Self {
            state: Mutex::new(State {
                generation: Generation::new(),
                err: None,
            }),
            timers,
        }
    }

    fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.state.lock().generation)
    }

    /// Blocks until the current generation resolves.
    ///
    /// `true` only for the waiter paired with [`CompletionToken::completed`].
    pub async fn wait(&self) -> bool {
        self.generation().wait().await
    }

    /// Like [`CompletionToken::wait`], giving up after `d`.
    ///
    /// On timeout records [`TokenError::WaitedTimeOut`] (unless an error is
    /// already recorded) and returns `false`. A later `completed` can still be
    /// observed by waiting again.
    pub async fn wait_timeout(&self, d: Duration) -> bool {
        let generation = self.generation();
        let Some(mut rx) = generation.enqueue() else {
            return false;
        };
        let mut timer = self.timers.get(d);
        let handed = tokio::select! {
            biased;
            handed = &mut rx => Some(handed.is_ok()),
            _ = generation.closed.cancelled() => Some(rx.try_recv().is_ok()),
            _ = timer.as_mut() => {
                // Closing first makes a concurrent `complete` skip this waiter
                // instead of handing it a success nobody reads.
                rx.close();
                rx.try_recv().ok().map(|()| true)
            }
        };
        self.timers.put(timer);

        match handed {
            Some(ok) => ok,
            None => {
                let mut state = self.state.lock();
                if Arc::ptr_eq(&state.generation, &generation) && state.err.is_none() {
                    state.err = Some(TokenError::WaitedTimeOut);
                }
                false
            }
        }
    }

    /// Records `err` (replacing any unread error) and fails every waiter of this generation.
    pub fn set_err<E>(&self, err: E)
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let generation = {
            let mut state = self.state.lock();
            state.err = Some(TokenError::failed(err));
            Arc::clone(&state.generation)
        };
        generation.close();
        tracing::debug!("token failed");
    }

    /// Hands success to the earliest blocked waiter, then closes the generation.
    ///
    /// Waits for a waiter to arrive if none is blocked yet; returns
    /// immediately if the generation is already closed.
    pub async fn completed(&self) {
        self.generation().complete().await;
    }

    /// Returns and clears the recorded error.
    pub fn err(&self) -> Option<TokenError> {
        self.state.lock().err.take()
    }

    /// Closes the current generation and starts a fresh one with no error.
    pub fn reset(&self) {
        let old = {
            let mut state = self.state.lock();
            state.err = None;
            std::mem::replace(&mut state.generation, Generation::new())
        };
        old.close();
    }

    /// Resolves once the current generation is closed (success or failure).
    ///
    /// Check [`CompletionToken::err`] afterwards to tell them apart.
    pub fn done(&self) -> WaitForCancellationFutureOwned {
        self.generation().closed.clone().cancelled_owned()
    }

    /// `true` if the current generation is closed.
    pub fn is_done(&self) -> bool {
        self.generation().closed.is_cancelled()
    }

    /// Number of waiters currently blocked on this generation.
    pub fn blocked(&self) -> usize {
        self.generation().blocked()
    }
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CompletionToken")
            .field("done", &state.generation.closed.is_cancelled())
            .field("err", &state.err.as_ref().map(TokenError::as_label))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn until_blocked(token: &CompletionToken, n: usize) {
        while token.blocked() < n {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_wait(token: &Arc<CompletionToken>) -> tokio::task::JoinHandle<bool> {
        let token = Arc::clone(token);
        tokio::spawn(async move { token.wait().await })
    }

    #[tokio::test]
    async fn test_first_waiter_wins() {
        let token = Arc::new(CompletionToken::new());
        let first = spawn_wait(&token);
        until_blocked(&token, 1).await;

        token.completed().await;
        assert!(first.await.expect("join"));
        assert!(!token.wait().await, "late waiter after success");
        assert!(token.is_done());
        assert!(token.err().is_none());
    }

    #[tokio::test]
    async fn test_only_one_of_many_blocked_waiters_succeeds() {
        let token = Arc::new(CompletionToken::new());
        let waiters: Vec<_> = (0..5).map(|_| spawn_wait(&token)).collect();
        until_blocked(&token, 5).await;

        token.completed().await;
        let mut wins = 0;
        for w in waiters {
            if w.await.expect("join") {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_completed_waits_for_a_waiter() {
        let token = Arc::new(CompletionToken::new());
        let producer = {
            let token = Arc::clone(&token);
            tokio::spawn(async move { token.completed().await })
        };
        tokio::task::yield_now().await;
        assert!(!token.is_done(), "no waiter yet");

        assert!(token.wait().await);
        producer.await.expect("join");
    }

    #[tokio::test]
    async fn test_set_err_fails_every_waiter_and_reads_once() {
        let token = Arc::new(CompletionToken::new());
        let waiters: Vec<_> = (0..3).map(|_| spawn_wait(&token)).collect();
        until_blocked(&token, 3).await;

        token.set_err("sensor offline");
        for w in waiters {
            assert!(!w.await.expect("join"));
        }
        assert!(!token.wait().await, "later waiter fails too");

        let err = token.err().expect("recorded");
        assert_eq!(err.to_string(), "sensor offline");
        assert!(token.err().is_none(), "read-once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_records_sentinel() {
        let token = CompletionToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(50)).await);
        assert!(matches!(token.err(), Some(TokenError::WaitedTimeOut)));
        assert!(token.err().is_none());
        assert!(!token.is_done(), "timeout does not close the generation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_keeps_existing_error() {
        let token = CompletionToken::new();
        token.set_err("boom");
        assert!(!token.wait_timeout(Duration::from_millis(50)).await);
        assert!(matches!(token.err(), Some(TokenError::Failed(_))));
    }

    #[tokio::test]
    async fn test_completed_skips_timed_out_waiter() {
        let token = Arc::new(CompletionToken::new());
        assert!(!token.wait_timeout(Duration::from_millis(1)).await);

        let waiter = spawn_wait(&token);
        until_blocked(&token, 1).await;
        token.completed().await;
        assert!(waiter.await.expect("join"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_at_timeout_instant_is_never_lost() {
        for _ in 0..200 {
            let token = Arc::new(CompletionToken::new());
            let waiter = {
                let token = Arc::clone(&token);
                tokio::spawn(async move { token.wait_timeout(Duration::from_millis(10)).await })
            };
            let producer = {
                let token = Arc::clone(&token);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    token.completed().await;
                })
            };

            let won = waiter.await.expect("join");
            if !won {
                // The timed-out waiter was skipped, so the success is still pending.
                assert!(matches!(token.err(), Some(TokenError::WaitedTimeOut)));
                assert!(token.wait().await, "success handed to the next waiter");
            }
            producer.await.expect("join");
            assert!(token.is_done());
            assert!(!token.wait().await, "exactly one success per generation");
        }
    }

    #[tokio::test]
    async fn test_reset_releases_stragglers() {
        let token = Arc::new(CompletionToken::new());
        let straggler = spawn_wait(&token);
        until_blocked(&token, 1).await;
        token.set_err("first run");

        token.reset();
        assert!(!straggler.await.expect("join"));
        assert!(token.err().is_none(), "reset clears the error");
        assert!(!token.is_done());

        let waiter = spawn_wait(&token);
        until_blocked(&token, 1).await;
        token.completed().await;
        assert!(waiter.await.expect("join"));
    }

    #[tokio::test]
    async fn test_reset_closes_parked_waiter() {
        let token = Arc::new(CompletionToken::new());
        let parked = spawn_wait(&token);
        until_blocked(&token, 1).await;

        token.reset();
        assert!(!parked.await.expect("join"));
    }

    #[tokio::test]
    async fn test_done_resolves_on_close() {
        let token = Arc::new(CompletionToken::new());
        let done = token.done();
        {
            let token = Arc::clone(&token);
            tokio::spawn(async move { token.set_err("stop") });
        }
        tokio::time::timeout(Duration::from_secs(1), done)
            .await
            .expect("generation closed");
        assert!(token.err().is_some());
    }
}
