//! Per-node execution counters, readable from any thread.
//!
//! Every node owns a [`NodeStats`]; workers record into it around each
//! function invocation and the monitor's reporter thread reads it without
//! touching the async runtime. Counters come in two windows: the interval
//! window (since the last report) and lifetime totals. Draining the interval
//! window folds it into the lifetime totals.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Execution counters for one node.
#[derive(Debug, Default)]
pub struct NodeStats {
  in_flight: AtomicUsize,
  interval_count: AtomicU64,
  interval_nanos: AtomicU64,
  lifetime_count: AtomicU64,
  lifetime_nanos: AtomicU64,
}

impl NodeStats {
  /// Marks one item as entering processing.
  pub(crate) fn enter(&self) {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
  }

  /// Marks one item as leaving processing.
  pub(crate) fn leave(&self) {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }

  /// Records one completed invocation.
  pub(crate) fn record(&self, elapsed: Duration) {
    self.interval_count.fetch_add(1, Ordering::Relaxed);
    self
      .interval_nanos
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
  }

  /// Items currently being processed.
  pub fn in_flight(&self) -> usize {
    self.in_flight.load(Ordering::SeqCst)
  }

  /// Takes the interval window, folding it into the lifetime totals.
  /// Returns `(invocations, busy_time)` for the window.
  pub fn drain_interval(&self) -> (u64, Duration) {
    let count = self.interval_count.swap(0, Ordering::Relaxed);
    let nanos = self.interval_nanos.swap(0, Ordering::Relaxed);
    self.lifetime_count.fetch_add(count, Ordering::Relaxed);
    self.lifetime_nanos.fetch_add(nanos, Ordering::Relaxed);
    (count, Duration::from_nanos(nanos))
  }

  /// Lifetime totals: `(invocations, busy_time)` since the node started,
  /// not counting an undrained interval window.
  pub fn lifetime(&self) -> (u64, Duration) {
    (
      self.lifetime_count.load(Ordering::Relaxed),
      Duration::from_nanos(self.lifetime_nanos.load(Ordering::Relaxed)),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn drain_folds_into_lifetime() {
    let stats = NodeStats::default();
    stats.record(Duration::from_millis(5));
    stats.record(Duration::from_millis(7));

    let (count, busy) = stats.drain_interval();
    assert_eq!(count, 2);
    assert_eq!(busy, Duration::from_millis(12));

    // Interval window is now empty; lifetime keeps the totals.
    assert_eq!(stats.drain_interval().0, 0);
    let (total, total_busy) = stats.lifetime();
    assert_eq!(total, 2);
    assert_eq!(total_busy, Duration::from_millis(12));
  }

  #[test]
  fn in_flight_tracks_enter_and_leave() {
    let stats = NodeStats::default();
    stats.enter();
    stats.enter();
    assert_eq!(stats.in_flight(), 2);
    stats.leave();
    assert_eq!(stats.in_flight(), 1);
  }
}
