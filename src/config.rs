//! # Kernel configuration.
//!
//! Provides [`Config`] centralized settings for the bus, the timer pool and
//! panic reporting.
//!
//! Config is used in two ways:
//! 1. **Bus creation**: `EventBus::from_config(&config)`
//! 2. **Timer pool creation**: `TimerPool::from_config(&config)`
//!
//! ## Sentinel values
//! - `bus_buffer < bus_buffer_floor` → rounded up to the floor
//! - `bus_buffer_floor = 0` → treated as 1 (a zero-capacity mpsc channel is invalid)
//! - `panic_report_limit = 0` → panic payloads are logged without a message

/// Global configuration for the kernel.
///
/// ## Field semantics
/// - `bus_buffer_floor`: minimum per-subscriber channel capacity (`0` = 1)
/// - `bus_buffer`: requested per-subscriber channel capacity
/// - `timer_pool_capacity`: idle timers kept for reuse (`0` = no pooling)
/// - `panic_report_limit`: max bytes of a panic message written to the log
#[derive(Clone, Debug)]
pub struct Config {
    /// Minimum capacity of every subscriber channel.
    ///
    /// Small requested sizes are rounded up to this value.
    pub bus_buffer_floor: usize,

    /// Requested capacity of every subscriber channel.
    ///
    /// A full channel blocks `publish` until the subscriber reads (backpressure).
    pub bus_buffer: usize,

    /// Number of idle timers the pool keeps for reuse.
    pub timer_pool_capacity: usize,

    /// Upper bound for the panic message written by the default recovery hook.
    pub panic_report_limit: usize,
}

impl Config {
    /// Returns the subscriber channel capacity after applying the floor.
    #[inline]
    pub fn bus_buffer_clamped(&self) -> usize {
        self.bus_buffer.max(self.bus_floor_clamped())
    }

    /// Returns the buffer floor clamped to a minimum of 1.
    #[inline]
    pub fn bus_floor_clamped(&self) -> usize {
        self.bus_buffer_floor.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `bus_buffer_floor = 10`
    /// - `bus_buffer = 10`
    /// - `timer_pool_capacity = 64`
    /// - `panic_report_limit = 8196`
    fn default() -> Self {
        Self {
            bus_buffer_floor: 10,
            bus_buffer: 10,
            timer_pool_capacity: 64,
            panic_report_limit: 8196,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_buffer_rounds_up_to_floor() {
        let cfg = Config {
            bus_buffer: 1,
            ..Config::default()
        };
        assert_eq!(cfg.bus_buffer_clamped(), 10);
    }

    #[test]
    fn test_zero_floor_clamps_to_one() {
        let cfg = Config {
            bus_buffer_floor: 0,
            bus_buffer: 0,
            ..Config::default()
        };
        assert_eq!(cfg.bus_buffer_clamped(), 1);
    }

    #[test]
    fn test_large_buffer_kept() {
        let cfg = Config {
            bus_buffer: 1000,
            ..Config::default()
        };
        assert_eq!(cfg.bus_buffer_clamped(), 1000);
    }
}
