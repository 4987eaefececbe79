//! # The Stage Contract
//!
//! [`Stage`] is the lifecycle-and-linking contract shared by [`Node`]s and
//! by whole groups ([`NodeGroup`](crate::group::NodeGroup),
//! [`Pipeline`](crate::pipeline::Pipeline),
//! [`Sequential`](crate::pipeline::Sequential)): start, drain, observe, and
//! wire. Because pipelines expose a head and a tail like a single node, a
//! nested pipeline connects into a larger graph exactly the way a node
//! does.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StageError;
use crate::message::{FlowItem, Payload};
use crate::node::{DeliveryMode, Node};

/// A forwarding rule: decides whether an emitted payload travels a given
/// edge.
pub type Predicate<T> = Arc<dyn Fn(&Payload<T>) -> bool + Send + Sync>;

/// The default predicate: forwards everything.
pub fn always<T>() -> Predicate<T> {
  Arc::new(|_| true)
}

/// Builds a predicate from a closure over the full [`Payload`] (live items
/// and failures alike).
pub fn when<T, F>(f: F) -> Predicate<T>
where
  F: Fn(&Payload<T>) -> bool + Send + Sync + 'static,
{
  Arc::new(f)
}

/// Builds a predicate over live items only; failed payloads are rejected.
///
/// Failures should normally travel an unconditional edge toward a sink, so
/// gated edges (cycle-back edges in particular) reject them by default.
pub fn on_item<T, F>(f: F) -> Predicate<T>
where
  F: Fn(&T) -> bool + Send + Sync + 'static,
{
  Arc::new(move |payload| payload.item().is_some_and(&f))
}

/// Started/running lifecycle bits shared between a stage and its observers.
#[derive(Debug, Clone, Default)]
pub(crate) struct LifecycleFlags {
  started: Arc<AtomicBool>,
  running: Arc<AtomicBool>,
}

impl LifecycleFlags {
  pub(crate) fn is_started(&self) -> bool {
    self.started.load(Ordering::SeqCst)
  }

  pub(crate) fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  pub(crate) fn mark_started(&self) {
    self.started.store(true, Ordering::SeqCst);
    self.running.store(true, Ordering::SeqCst);
  }

  pub(crate) fn set_running(&self, running: bool) {
    self.running.store(running, Ordering::SeqCst);
  }
}

/// Lifecycle and wiring contract for every pipeline member.
///
/// Implemented by [`Node`] (head = tail = itself) and by the group types
/// (head/tail delegate to designated members). All wiring happens before
/// [`start`](Stage::start); afterwards the topology is frozen.
#[async_trait::async_trait]
pub trait Stage<T: FlowItem>: Send + Sync {
  /// Stage name, used in logs and reports.
  fn name(&self) -> String;

  /// Assigns the hierarchical graph position used in reports.
  fn assign_serial(&self, serial: Vec<usize>);

  /// The hierarchical graph position.
  fn serial(&self) -> Vec<usize>;

  /// Starts the stage (spawning workers/watchers). Must be called inside a
  /// Tokio runtime.
  fn start(&self);

  /// Stops accepting new work; queued and in-flight items run to
  /// completion.
  async fn end(&self);

  /// `true` once [`start`](Stage::start) ran.
  fn is_started(&self) -> bool;

  /// `true` from [`start`](Stage::start) until the stage fully drained.
  fn is_running(&self) -> bool;

  /// Entry node, when the stage designates one.
  fn head(&self) -> Option<Node<T>>;

  /// Exit node, when the stage designates one.
  fn tail(&self) -> Option<Node<T>>;

  /// Every leaf node in this stage, recursively.
  fn nodes(&self) -> Vec<Node<T>>;

  /// Enqueues an item into the stage's head, suspending while the head's
  /// queue is full (backpressure). Fails if the stage has no designated
  /// head or stopped accepting input.
  async fn put(&self, item: T) -> Result<(), StageError> {
    match self.head() {
      Some(head) => head.push_item(item).await,
      None => Err(StageError::illegal_argument(
        self.name(),
        "stage has no designated head",
      )),
    }
  }

  /// Wires this stage's tail to `other`'s head with the default
  /// always-true predicate.
  fn connect(&self, other: &dyn Stage<T>) {
    self.connect_when(other, always());
  }

  /// Wires this stage's tail to `other`'s head, forwarding only payloads
  /// the predicate accepts.
  fn connect_when(&self, other: &dyn Stage<T>, predicate: Predicate<T>) {
    self.wire(other, predicate, DeliveryMode::Transfer, true);
  }

  /// Wires with an explicit [`DeliveryMode`].
  fn connect_with(&self, other: &dyn Stage<T>, predicate: Predicate<T>, delivery: DeliveryMode) {
    self.wire(other, predicate, delivery, true);
  }

  /// Wires a cycle-back edge: same forwarding semantics as
  /// [`connect_when`](Stage::connect_when), but the destination does not
  /// treat this stage as an upstream dependency when deciding it has
  /// drained. Use for edges whose destination sits earlier in the graph;
  /// the predicate must eventually reject or the items cycle forever.
  fn connect_cycle(&self, other: &dyn Stage<T>, predicate: Predicate<T>) {
    self.wire(other, predicate, DeliveryMode::Transfer, false);
  }

  /// Replaces the predicate on the existing edge toward `other`.
  fn set_dst_criteria(&self, other: &dyn Stage<T>, predicate: Predicate<T>) {
    match (self.tail(), other.head()) {
      (Some(tail), Some(head)) => tail.replace_criteria(&Stage::name(&head), predicate),
      _ => tracing::error!(
        from = %self.name(),
        to = %other.name(),
        "cannot change criteria between stages without designated head/tail"
      ),
    }
  }

  /// Low-level wiring used by the `connect*` methods.
  fn wire(
    &self,
    other: &dyn Stage<T>,
    predicate: Predicate<T>,
    delivery: DeliveryMode,
    register_upstream: bool,
  ) {
    match (self.tail(), other.head()) {
      (Some(tail), Some(head)) => tail.link_to(&head, predicate, delivery, register_upstream),
      _ => tracing::error!(
        from = %self.name(),
        to = %other.name(),
        "cannot connect stages without designated head/tail"
      ),
    }
  }
}
