//! # Pooled timers.
//!
//! [`TimerSource`] is the boundary through which the bus and the completion
//! token obtain timers; [`TimerPool`] is the default implementation.
//!
//! ## Architecture
//! ```text
//! publish_async / wait_timeout
//!        │ get(d)                         put(timer)
//!        ▼                                    ▲
//!   ┌─────────────────────────────────────────┴──┐
//!   │ TimerPool (idle: Vec<Pin<Box<Sleep>>>)     │
//!   │   hit  → reset(now + d)                    │
//!   │   miss → Box::pin(sleep(d))                │
//!   └────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - A timer returned by `get` is armed for `now + d`; it never reports an
//!   expiry left over from a previous user.
//! - `put` keeps at most `capacity` idle timers; extra ones are dropped.
//! - Timers belong to the runtime they were created on. Share one pool per
//!   runtime (wire it at the composition root); do not move pools between runtimes.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, Sleep};

use crate::config::Config;

/// A pinned, resettable timer.
pub type Timer = Pin<Box<Sleep>>;

/// Shared handle to a timer source.
pub type TimerRef = Arc<dyn TimerSource>;

/// Source of one-shot timers.
///
/// Implementations must hand out timers armed for exactly `d` from now.
pub trait TimerSource: Send + Sync + 'static {
    /// Returns a timer that fires `d` from now.
    fn get(&self, d: Duration) -> Timer;

    /// Returns a timer to the source for reuse.
    fn put(&self, timer: Timer);
}

/// Bounded pool of reusable [`Sleep`] timers.
#[derive(Debug)]
pub struct TimerPool {
    idle: Mutex<Vec<Timer>>,
    capacity: usize,
}

impl TimerPool {
    /// Creates a pool keeping up to `capacity` idle timers.
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Creates a pool sized from [`Config::timer_pool_capacity`].
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.timer_pool_capacity)
    }

    /// Creates a pool with the default capacity as a shared handle.
    pub fn shared() -> TimerRef {
        Arc::new(Self::from_config(&Config::default()))
    }

    /// Number of idle timers currently pooled.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for TimerPool {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TimerSource for TimerPool {
    fn get(&self, d: Duration) -> Timer {
        let deadline = Instant::now() + d;
        let pooled = self.idle.lock().pop();
        match pooled {
            Some(mut timer) => {
                timer.as_mut().reset(deadline);
                timer
            }
            None => Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    fn put(&self, timer: Timer) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_timer_fires_and_is_reused() {
        let pool = TimerPool::new(4);
        for _ in 0..10 {
            let mut tm = pool.get(Duration::from_millis(20));
            assert!(tm.as_mut().now_or_never().is_none(), "timer already expired");

            tokio::time::timeout(Duration::from_millis(500), tm.as_mut())
                .await
                .expect("timer didn't expire in time");
            pool.put(tm);
            assert_eq!(pool.idle(), 1);
        }
    }

    #[tokio::test]
    async fn test_put_respects_capacity() {
        let pool = TimerPool::new(1);
        let a = pool.get(Duration::from_secs(1));
        let b = pool.get(Duration::from_secs(1));
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_timer_is_rearmed() {
        let pool = TimerPool::new(1);
        let mut tm = pool.get(Duration::from_millis(5));
        tm.as_mut().await;
        pool.put(tm);

        let mut tm = pool.get(Duration::from_secs(10));
        assert!(tm.as_mut().now_or_never().is_none());
        assert!(tm.deadline() > Instant::now());
    }
}
