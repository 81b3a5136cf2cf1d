//! # unitvisor
//!
//! **Unitvisor** is a small concurrency-coordination kernel for supervised,
//! composable runtime components (sensors, actuators, controllers, ...).
//!
//! It gives every unit a uniform lifecycle (start/stop/finalize), a uniform
//! cancellation and timeout mechanism, a way to register many workers and
//! release them together once fan-out setup is complete, a topic bus for
//! inter-component signaling, and a resettable completion token for
//! cross-task result handoff.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!  │  Component   │  │  Component   │  │  Component   │   ◄── ComponentSet
//!  │  (sensor)    │  │  (actuator)  │  │ (controller) │       (ordered, batch errors)
//!  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!         │ fork()          │ fork()          │ own scope
//!         ▼                 ▼                 ▼
//!  ┌───────────────────────────────────┐  ┌──────────────┐
//!  │ ControlScope (ScopeToken tree)    │  │ ControlScope │
//!  │   └─ Arc<WorkerGroup> (shared)    │  │  └─ group    │
//!  │        gate: closed ─► open()     │  └──────────────┘
//!  └───────────────────────────────────┘
//!
//!  EventBus<T>:  publish(topic) ──► [chan] [chan] ... ──► Subscription
//!  CompletionToken: wait() ◄── completed() / set_err()
//!  TimerPool: pooled timers for publish_async / wait_timeout
//! ```
//!
//! ### Lifecycle
//! ```text
//! Stopped ──start()──► Starting ──► Running ──stop()──► Stopping ──► Stopped
//!    │                    (routine registered,             (scope cancelled,
//!    │                     gate opened)                     routine exited)
//!    └──finalize()──► Finalized (terminal; waits for the group to drain)
//! ```
//!
//! ## Features
//! | Area            | Description                                             | Key types / traits                         |
//! |-----------------|---------------------------------------------------------|--------------------------------------------|
//! | **Lifecycle**   | Start/stop/finalize state machine and ordered batches.  | [`Lifecycle`], [`Component`], [`ComponentSet`] |
//! | **Routines**    | Cancelable work run while a component is started.       | [`Routine`], [`RoutineFn`], [`WaitForCancel`] |
//! | **Control**     | Cancellable scopes and gated worker fan-out.            | [`ControlScope`], [`ScopeToken`], [`WorkerGroup`] |
//! | **Bus**         | Topic pub/sub with per-subscriber buffers.              | [`EventBus`], [`Subscription`]             |
//! | **Handoff**     | One-shot, resettable success/failure signal.            | [`CompletionToken`]                        |
//! | **Errors**      | Typed errors with stable labels.                        | [`ComponentError`], [`BusError`], [`WorkError`] |
//! | **Configuration** | Centralize buffer and pool settings.                  | [`Config`]                                 |
//!
//! ## Example
//! ```rust
//! use unitvisor::{
//!     Component, ComponentSet, ControlScope, Lifecycle, LifecycleRef, RoutineFn, ScopeToken, WorkError,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = ControlScope::new(None);
//!
//!     let sensor = Component::builder("sensor")
//!         .scope(root.fork())
//!         .routine(RoutineFn::arc(|ctx: ScopeToken| async move {
//!             ctx.cancelled().await;
//!             Ok::<_, WorkError>(())
//!         }))
//!         .build_arc();
//!     let actuator = Component::builder("actuator").scope(root.fork()).build_arc();
//!
//!     let members: [Option<LifecycleRef>; 2] = [Some(sensor.clone()), Some(actuator)];
//!     let set = ComponentSet::new(members);
//!     set.start().await?;
//!     assert!(sensor.is_running());
//!
//!     set.stop().await?;
//!     set.finalize().await?;
//!     Ok(())
//! }
//! ```

mod components;
mod config;
mod control;
mod error;
mod events;
mod timers;
mod token;

// ---- Public re-exports ----

pub use components::{
    Component, ComponentBuilder, ComponentSet, Id, Kind, Lifecycle, LifecycleRef, Routine,
    RoutineFn, RoutineRef, State, WaitForCancel,
};
pub use config::Config;
pub use control::{
    CancelCause, ControlScope, PanicReport, ScopeToken, Worker, WorkerGroup, WorkerHandle,
    WorkerRef,
};
pub use error::{BusError, ComponentError, TokenError, WorkError};
pub use events::{EventBus, Subscription, TopicInfo};
pub use timers::{Timer, TimerPool, TimerRef, TimerSource};
pub use token::CompletionToken;
