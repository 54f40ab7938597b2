//! Timing configuration for connection deadlines.

use std::{cmp, time::Duration};

/// Deadlines applied to the phases of an exchange.
///
/// The write deadline grows with the payload so large messages are granted
/// proportionally more time, bounded below by `min_timeout`. The connect
/// phase and the initial inbound receive use the fixed `initial_timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    /// Deadline for the outbound connect and for the initial inbound receive.
    pub initial_timeout: Duration,
    /// Floor applied to the proportional write deadline.
    pub min_timeout: Duration,
    /// Time budget granted per payload byte when writing.
    pub per_byte: Duration,
}

impl TimingConfig {
    /// Deadline for writing a frame carrying `payload_size` bytes of payload.
    ///
    /// Computed as `max(payload_size * per_byte, min_timeout)`.
    #[must_use]
    pub fn write_deadline(&self, payload_size: usize) -> Duration {
        let factor = u32::try_from(payload_size).unwrap_or(u32::MAX);
        cmp::max(self.per_byte.saturating_mul(factor), self.min_timeout)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(10),
            min_timeout: Duration::from_millis(500),
            per_byte: Duration::from_micros(10),
        }
    }
}
