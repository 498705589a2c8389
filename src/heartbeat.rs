//! Application-level ping/pong heartbeat.
//!
//! A [`HeartbeatMonitor`] belongs to exactly one open connection. It owns the
//! periodic timer and a lease on the client's [`TimerGauge`]; dropping the
//! monitor is the only way to cancel the timer, so every exit path from the
//! open state releases it.
//!
//! The monitor never writes to the socket itself. It hands back the envelope
//! to send (if any) and the connection task performs the write.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use frames::{Envelope, Heartbeat};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Count of live heartbeat timers, shared between a client handle and its
/// connection task.
#[derive(Clone, Debug, Default)]
pub struct TimerGauge(Arc<AtomicUsize>);

impl TimerGauge {
    #[must_use]
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> TimerLease {
        self.0.fetch_add(1, Ordering::SeqCst);
        TimerLease(Arc::clone(&self.0))
    }
}

#[derive(Debug)]
struct TimerLease(Arc<AtomicUsize>);

impl Drop for TimerLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Probe/response counters for one open connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub pings_sent: u64,
    pub pongs_sent: u64,
    pub pongs_received: u64,
    pub last_pong: Option<Instant>,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Interval,
    stats: HeartbeatStats,
    _lease: TimerLease,
}

impl HeartbeatMonitor {
    /// Start the timer. The first probe is due one full `period` from now.
    #[must_use]
    pub fn start(period: Duration, gauge: &TimerGauge) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            interval,
            stats: HeartbeatStats::default(),
            _lease: gauge.acquire(),
        }
    }

    /// Wait for the next probe deadline. Cancel-safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Probe to send for a tick. The monitor only exists while the
    /// connection is open, so there is no closed-transport case to skip here.
    pub fn on_tick(&mut self) -> Envelope {
        self.stats.pings_sent += 1;
        Envelope::ping()
    }

    /// Handle an inbound heartbeat frame; returns the reply to send, if any.
    pub fn on_heartbeat(&mut self, beat: Heartbeat) -> Option<Envelope> {
        match beat {
            Heartbeat::Ping => {
                self.stats.pongs_sent += 1;
                Some(Envelope::pong())
            }
            Heartbeat::Pong => {
                self.stats.pongs_received += 1;
                self.stats.last_pong = Some(Instant::now());
                None
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> &HeartbeatStats {
        &self.stats
    }
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
