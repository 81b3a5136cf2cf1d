//! # Components: lifecycle units and their ordered collection.
//!
//! This module provides the component-related types:
//! - [`Lifecycle`] - uniform start/stop/finalize contract
//! - [`Component`] - state machine over one [`ControlScope`](crate::ControlScope)
//! - [`Routine`], [`RoutineFn`], [`WaitForCancel`] - the work strategy a component runs
//! - [`ComponentSet`] - ordered fan-out with aggregated errors
//! - [`Id`], [`Kind`] - identity and kind tags

mod component;
mod ident;
mod routine;
mod set;

pub use component::{Component, ComponentBuilder, Lifecycle, LifecycleRef, State};
pub use ident::{Id, Kind};
pub use routine::{Routine, RoutineFn, RoutineRef, WaitForCancel};
pub use set::ComponentSet;
