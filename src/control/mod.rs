//! Control layer: cancellable scopes and the gated worker group.
//!
//! ## Contents
//! - [`ScopeToken`], [`CancelCause`] cancellation handle that remembers why it fired
//! - [`ControlScope`] current token + shared [`WorkerGroup`], forkable
//! - [`WorkerGroup`], [`Worker`] in-flight tracking and the fan-out start gate
//!
//! ## Quick wiring
//! ```text
//! ControlScope ──token()──► routine (waits on cancellation)
//!      └──group()──► WorkerGroup::register_and_wait(worker) ─► open() ─► wait_async()
//! ```

mod group;
mod scope;

pub use group::{PanicReport, Worker, WorkerGroup, WorkerHandle, WorkerRef};
pub use scope::{CancelCause, ControlScope, ScopeToken};
