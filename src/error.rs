//! Error types used by the unitvisor kernel.
//!
//! This module defines four error enums:
//!
//! - [`ComponentError`] - lifecycle state conflicts and aggregated batch failures.
//! - [`BusError`] - topic bus protocol errors.
//! - [`TokenError`] - completion token failures (timeout sentinel or caller error).
//! - [`WorkError`] - outcome of a single routine execution.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).
//! Nothing in the kernel panics or exits on these; they are returned values.

use std::fmt;

use thiserror::Error;

use crate::components::Id;

/// # Errors produced by component lifecycle transitions.
///
/// State conflicts are returned synchronously and are always recoverable by
/// checking [`Lifecycle::is_running`](crate::Lifecycle::is_running) first.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ComponentError {
    /// `start` was called on a component that is not stopped.
    #[error("component {info} is already running")]
    AlreadyRunning {
        /// Component label (`(cmpt)[Kd:..,Id:..]`).
        info: String,
    },

    /// `stop` was called on a component that is not running.
    #[error("component {info} is not running")]
    NotRunning {
        /// Component label (`(cmpt)[Kd:..,Id:..]`).
        info: String,
    },

    /// The component was finalized and cannot be started again.
    #[error("component {info} is finalized")]
    Finalized {
        /// Component label (`(cmpt)[Kd:..,Id:..]`).
        info: String,
    },

    /// One or more members of a [`ComponentSet`](crate::ComponentSet) failed.
    #[error("{}", BatchDisplay(.0))]
    Batch(Vec<ComponentError>),
}

impl ComponentError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use unitvisor::ComponentError;
    ///
    /// let err = ComponentError::NotRunning { info: "x".into() };
    /// assert_eq!(err.as_label(), "component_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::AlreadyRunning { .. } => "component_already_running",
            ComponentError::NotRunning { .. } => "component_not_running",
            ComponentError::Finalized { .. } => "component_finalized",
            ComponentError::Batch(_) => "component_batch",
        }
    }

    /// Returns the member errors of a batch (or a single-element slice otherwise).
    pub fn errors(&self) -> &[ComponentError] {
        match self {
            ComponentError::Batch(errs) => errs,
            other => std::slice::from_ref(other),
        }
    }

    /// Folds a list of member errors into `Ok(())` or a single [`ComponentError::Batch`].
    pub(crate) fn aggregate(errs: Vec<ComponentError>) -> Result<(), ComponentError> {
        if errs.is_empty() {
            Ok(())
        } else {
            Err(ComponentError::Batch(errs))
        }
    }
}

struct BatchDisplay<'a>(&'a [ComponentError]);

impl fmt::Display for BatchDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} component error(s) occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

/// # Errors produced by the topic bus.
///
/// All bus errors are returned synchronously and are recoverable.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Topic name was empty.
    #[error("evtchans: topic empty")]
    TopicEmpty,

    /// No subscription with that topic and channel exists.
    #[error("evtchans: topic and chan is not found")]
    TopicOrChannelNotFound,

    /// The bus was closed.
    #[error("evtchans: events chan closed")]
    BusClosed,

    /// The caller's cancellation signal fired before delivery finished.
    #[error("evtchans: context cancelled")]
    Canceled,

    /// Delivery did not finish within the supplied timeout.
    #[error("evtchans: time out")]
    AsyncTimeout,
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::TopicEmpty => "bus_topic_empty",
            BusError::TopicOrChannelNotFound => "bus_topic_or_channel_not_found",
            BusError::BusClosed => "bus_closed",
            BusError::Canceled => "bus_canceled",
            BusError::AsyncTimeout => "bus_async_timeout",
        }
    }
}

/// # Errors recorded on a [`CompletionToken`](crate::CompletionToken).
///
/// Read once via [`CompletionToken::err`](crate::CompletionToken::err).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TokenError {
    /// A `wait_timeout` call gave up before the token resolved.
    #[error("timeout waiting for token")]
    WaitedTimeOut,

    /// Failure supplied by the producer through `set_err`.
    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl TokenError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TokenError::WaitedTimeOut => "token_waited_timeout",
            TokenError::Failed(_) => "token_failed",
        }
    }

    /// Wraps any caller error.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TokenError::Failed(err.into())
    }
}

/// # Outcome of one routine execution.
///
/// `Canceled` and `DeadlineExceeded` are normal exits (see [`WorkError::is_normal_exit`]);
/// `Fail` is logged by the worker group and otherwise left to the caller's policy.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// Routine failed.
    #[error("work failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Routine stopped because its scope was cancelled.
    #[error("context cancelled")]
    Canceled,

    /// Routine stopped because its scope deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl WorkError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use unitvisor::WorkError;
    ///
    /// assert_eq!(WorkError::DeadlineExceeded.as_label(), "work_deadline_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkError::Fail { .. } => "work_failed",
            WorkError::Canceled => "work_canceled",
            WorkError::DeadlineExceeded => "work_deadline_exceeded",
        }
    }

    /// `true` for cancellation and deadline exits, which are not failures.
    pub fn is_normal_exit(&self) -> bool {
        matches!(self, WorkError::Canceled | WorkError::DeadlineExceeded)
    }

    /// Shorthand for [`WorkError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        WorkError::Fail {
            error: error.into(),
        }
    }
}

/// Builds the lifecycle error label for a component.
pub(crate) fn component_info(kind: &str, id: &Id) -> String {
    format!("(cmpt)[Kd:{kind},Id:{id}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_display_lists_members() {
        let err = ComponentError::Batch(vec![
            ComponentError::NotRunning { info: "a".into() },
            ComponentError::AlreadyRunning { info: "b".into() },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 component error(s) occurred:"));
        assert!(text.contains("component a is not running"));
        assert!(text.contains("component b is already running"));
        assert_eq!(err.errors().len(), 2);
    }

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(ComponentError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn test_single_error_slice() {
        let err = ComponentError::Finalized { info: "c".into() };
        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.as_label(), "component_finalized");
    }

    #[test]
    fn test_normal_exit() {
        assert!(WorkError::Canceled.is_normal_exit());
        assert!(WorkError::DeadlineExceeded.is_normal_exit());
        assert!(!WorkError::fail("boom").is_normal_exit());
    }

    #[test]
    fn test_token_error_failed_message() {
        let err = TokenError::failed("device offline");
        assert_eq!(err.to_string(), "device offline");
        assert_eq!(err.as_label(), "token_failed");
    }
}
