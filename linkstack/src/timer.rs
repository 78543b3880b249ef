//! Retransmission timeouts.
//!
//! Perfect Links resend every unacknowledged packet once its timeout has
//! elapsed, indefinitely: over a fair-loss link the only way to guarantee
//! eventual delivery is to keep trying.  [`RetransmitPolicy`] decides how long
//! to wait after each transmission.
//!
//! Timers are not tasks of their own.  The event loop owning a layer ticks it
//! periodically (see [`crate::socket::DEFAULT_TICK`]) and each pending entry
//! is resent by the first tick at or after its deadline, so the effective
//! timeout is rounded up to the tick granularity.

use std::time::Duration;

/// Baseline retransmission timeout.
pub const DEFAULT_RTO: Duration = Duration::from_millis(1000);

/// Upper bound for exponential back-off when none is given.
pub const DEFAULT_MAX_RTO: Duration = Duration::from_secs(60);

/// How long to wait for an acknowledgement before resending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitPolicy {
    /// Resend every `rto`, forever.
    Fixed(Duration),
    /// Start at `initial`, double after every transmission, never exceed
    /// `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RTO)
    }
}

impl RetransmitPolicy {
    /// Exponential back-off from `initial` up to [`DEFAULT_MAX_RTO`].
    pub fn backoff(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            max: DEFAULT_MAX_RTO.max(initial),
        }
    }

    /// Timeout to arm after the `tx_count`-th transmission (1 = first send).
    pub fn timeout(&self, tx_count: u32) -> Duration {
        match *self {
            Self::Fixed(rto) => rto,
            Self::Exponential { initial, max } => {
                let doublings = tx_count.saturating_sub(1).min(31);
                initial.saturating_mul(1 << doublings).min(max)
            }
        }
    }
}
