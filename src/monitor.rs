//! # Runtime Telemetry
//!
//! Observability is explicit: build a [`Monitor`], register the analysers
//! you want, and hand the analysers the pipelines to watch. There is no
//! process-wide registry.
//!
//! The monitor's reporting loop runs on a **dedicated OS thread**, not on
//! the async runtime. Telemetry therefore keeps its cadence even when every
//! worker task is saturated — a reporter sharing the cooperative scheduler
//! could starve behind the very congestion it is supposed to reveal.
//!
//! [`PipelineAnalyser`] renders one table row per node: graph position,
//! name, state, queue occupancy, in-flight count and throughput over the
//! last interval plus the node's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::message::FlowItem;
use crate::node::Node;
use crate::stage::Stage;
use crate::stats::NodeStats;

fn lock<L>(mutex: &StdMutex<L>) -> MutexGuard<'_, L> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A source of periodic reports.
pub trait Analyser: Send + Sync {
  /// Called once when the owning [`Monitor`] starts.
  fn start(&self);
  /// Renders the current report.
  fn report(&self) -> String;
}

/// Periodic reporter over a set of analysers.
pub struct Monitor {
  interval: Duration,
  analysers: StdMutex<Vec<Arc<dyn Analyser>>>,
  stop: Arc<AtomicBool>,
  thread: StdMutex<Option<std::thread::JoinHandle<()>>>,
}

impl Monitor {
  /// Builds a monitor reporting every `interval`.
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      analysers: StdMutex::new(Vec::new()),
      stop: Arc::new(AtomicBool::new(false)),
      thread: StdMutex::new(None),
    }
  }

  /// Registers an analyser. Call before [`start`](Monitor::start).
  pub fn register(&self, analyser: Arc<dyn Analyser>) {
    lock(&self.analysers).push(analyser);
  }

  /// Starts every registered analyser, then begins the reporting loop on
  /// its own OS thread.
  pub fn start(&self) {
    if lock(&self.thread).is_some() {
      warn!("monitor already started");
      return;
    }
    let analysers = lock(&self.analysers).clone();
    for analyser in &analysers {
      analyser.start();
    }
    let interval = self.interval;
    let stop = Arc::clone(&self.stop);
    let spawned = std::thread::Builder::new()
      .name("taskweave-monitor".into())
      .spawn(move || {
        let started_at = Instant::now();
        let tick = Duration::from_millis(50);
        let mut since_report = Duration::ZERO;
        loop {
          std::thread::sleep(tick);
          if stop.load(Ordering::SeqCst) {
            break;
          }
          since_report += tick;
          if since_report < interval {
            continue;
          }
          since_report = Duration::ZERO;
          info!(
            elapsed_secs = started_at.elapsed().as_secs_f64(),
            "monitor report"
          );
          for analyser in &analysers {
            info!("\n{}", analyser.report());
          }
        }
      });
    match spawned {
      Ok(handle) => *lock(&self.thread) = Some(handle),
      Err(err) => warn!(error = %err, "failed to spawn monitor thread"),
    }
  }

  /// Stops the reporting loop and waits for the thread to exit.
  pub fn stop(&self) {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(handle) = lock(&self.thread).take() {
      let _ = handle.join();
    }
  }
}

impl Drop for Monitor {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
  }
}

/// Type-erased view over one node, read by the reporter thread.
trait NodeProbe: Send + Sync {
  fn name(&self) -> String;
  fn serial(&self) -> Vec<usize>;
  fn is_started(&self) -> bool;
  fn is_running(&self) -> bool;
  fn queue(&self) -> (usize, usize);
  fn in_flight(&self) -> (usize, usize);
  fn stats(&self) -> Arc<NodeStats>;
}

impl<T: FlowItem> NodeProbe for Node<T> {
  fn name(&self) -> String {
    Stage::name(self)
  }

  fn serial(&self) -> Vec<usize> {
    Stage::serial(self)
  }

  fn is_started(&self) -> bool {
    Stage::is_started(self)
  }

  fn is_running(&self) -> bool {
    Stage::is_running(self)
  }

  fn queue(&self) -> (usize, usize) {
    (self.queue_depth(), self.queue_capacity())
  }

  fn in_flight(&self) -> (usize, usize) {
    (self.stats().in_flight(), self.workers())
  }

  fn stats(&self) -> Arc<NodeStats> {
    Node::stats(self)
  }
}

/// Analyser rendering a per-node table for one or more pipelines.
#[derive(Default)]
pub struct PipelineAnalyser {
  probes: StdMutex<Vec<Arc<dyn NodeProbe>>>,
}

impl PipelineAnalyser {
  /// Builds an analyser watching nothing yet.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers every leaf node of `stage` for reporting. May be called for
  /// several pipelines; rows accumulate.
  pub fn register<T: FlowItem>(&self, stage: &dyn Stage<T>) {
    let mut probes = lock(&self.probes);
    for node in stage.nodes() {
      probes.push(Arc::new(node));
    }
  }
}

impl Analyser for PipelineAnalyser {
  fn start(&self) {
    debug!(nodes = lock(&self.probes).len(), "pipeline analyser active");
  }

  fn report(&self) -> String {
    let probes = lock(&self.probes).clone();
    let mut rows = Vec::with_capacity(probes.len());
    for probe in &probes {
      let serial = probe.serial();
      let serial = if serial.is_empty() {
        "-".to_string()
      } else {
        serial
          .iter()
          .map(usize::to_string)
          .collect::<Vec<_>>()
          .join("-")
      };
      let state = if probe.is_running() {
        "Running"
      } else if probe.is_started() {
        "Finished"
      } else {
        "Idle"
      };
      let (queued, capacity) = probe.queue();
      let (busy, workers) = probe.in_flight();
      let stats = probe.stats();
      let (count, elapsed) = stats.drain_interval();
      let (total, total_elapsed) = stats.lifetime();
      rows.push(vec![
        serial,
        probe.name(),
        state.to_string(),
        format!("{}/{}", queued, capacity),
        format!("{}/{}", busy, workers),
        format_rate(count, elapsed),
        format_rate(total, total_elapsed),
      ]);
    }
    let headers = ["Serial", "Name", "State", "Wait", "Exec", "Speed", "Avg Speed"];
    format!("Pipeline Report\n{}", render_table(&headers, &rows))
  }
}

fn format_rate(count: u64, busy: Duration) -> String {
  if count == 0 || busy.is_zero() {
    return "n/a".to_string();
  }
  let secs = busy.as_secs_f64();
  format!("{}/{:.2}s, {:.2}/s", count, secs, count as f64 / secs)
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
  let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
  for row in rows {
    for (index, cell) in row.iter().enumerate() {
      if cell.len() > widths[index] {
        widths[index] = cell.len();
      }
    }
  }

  let mut out = String::new();
  for (index, header) in headers.iter().enumerate() {
    out.push_str(&format!("{:<width$}  ", header, width = widths[index]));
  }
  out.push('\n');
  for (index, _) in headers.iter().enumerate() {
    out.push_str(&"-".repeat(widths[index]));
    out.push_str("  ");
  }
  for row in rows {
    out.push('\n');
    for (index, cell) in row.iter().enumerate() {
      out.push_str(&format!("{:<width$}  ", cell, width = widths[index]));
    }
  }
  out
}
