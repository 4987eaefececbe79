//! # Processing Units
//!
//! A [`Node`] is one pipeline stage: an async processing function behind a
//! bounded input queue, executed by a fixed pool of worker tasks, with an
//! ordered fan-out list of predicate-gated edges.
//!
//! ## Execution model
//!
//! `start()` spawns `workers` tasks. Each loops: dequeue (the workers share
//! one receiver behind an async mutex, so dequeue order is FIFO) → invoke
//! the stage function → for every outgoing edge whose predicate accepts the
//! result, enqueue into the destination. Sending into a full destination
//! queue suspends the worker, propagating backpressure upstream. A producer
//! calling [`put`](crate::stage::Stage::put) against a full input queue
//! suspends the same way — items are never dropped and never overflow.
//!
//! ## Failure isolation
//!
//! An error returned by the stage function (other than the
//! [`Halt`](crate::error::StageError::Halt) control signal) is wrapped into
//! a [`StageFailure`] and forwarded downstream as that item's output value.
//! The worker keeps running; other in-flight items are unaffected. Stages
//! built with [`Node::new`], [`Node::expanding`], [`Node::filtering`] and
//! [`Node::sink`] never see failed payloads — failures pass through them
//! untouched. A [`Node::recovering`] stage receives the raw [`Payload`] and
//! may turn a failure back into a live item.
//!
//! ## Wiring
//!
//! Edges are added through the [`Stage`](crate::stage::Stage) connect
//! methods before `start()`; the edge list is snapshotted at start and
//! immutable while running. An edge whose destination sits earlier in the
//! graph forms a cycle; wire those with
//! [`connect_cycle`](crate::stage::Stage::connect_cycle) so drain detection
//! ignores them, and make the predicate reject eventually — termination of
//! a cycle is the predicate's responsibility.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::{StageError, StageFailure};
use crate::message::{FlowItem, Payload};
use crate::stage::{LifecycleFlags, Predicate, Stage};
use crate::stats::NodeStats;

/// Boxed future returned by adapted stage functions.
pub type StageFuture<Out> = Pin<Box<dyn Future<Output = Out> + Send>>;

type ProcFn<T> = Arc<dyn Fn(Payload<T>) -> StageFuture<Vec<Payload<T>>> + Send + Sync>;

/// How an edge hands the payload to its destination.
///
/// Decided at wiring time, replacing a dispatch-time deep-copy flag: when
/// several downstream stages must not observe each other's mutations, wire
/// their edges with [`DeliveryMode::Clone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
  /// Move the payload to the destination (the last accepting edge reuses
  /// the original; earlier accepting edges always clone).
  #[default]
  Transfer,
  /// Always hand the destination its own clone.
  Clone,
}

/// Per-node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
  /// Worker task count; the node's concurrency level.
  pub workers: usize,
  /// Input queue capacity. `None` means "same as `workers`".
  pub queue_size: Option<usize>,
  /// Cadence of the upstream-drain watcher.
  pub watch_interval: Duration,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      workers: 1,
      queue_size: None,
      watch_interval: Duration::from_millis(100),
    }
  }
}

impl NodeConfig {
  /// Sets the worker count.
  #[must_use]
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// Sets the input queue capacity.
  #[must_use]
  pub fn with_queue_size(mut self, queue_size: usize) -> Self {
    self.queue_size = Some(queue_size);
    self
  }

  /// Sets the upstream-drain watcher cadence.
  #[must_use]
  pub fn with_watch_interval(mut self, interval: Duration) -> Self {
    self.watch_interval = interval;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
  Transform,
  Sink,
}

enum Message<T> {
  Payload(Payload<T>),
  Stop,
}

struct Edge<T> {
  target_name: String,
  target: mpsc::Sender<Message<T>>,
  predicate: Predicate<T>,
  delivery: DeliveryMode,
}

impl<T> Clone for Edge<T> {
  fn clone(&self) -> Self {
    Self {
      target_name: self.target_name.clone(),
      target: self.target.clone(),
      predicate: self.predicate.clone(),
      delivery: self.delivery,
    }
  }
}

pub(crate) struct Upstream {
  pub(crate) name: String,
  pub(crate) flags: LifecycleFlags,
}

struct Inner<T: FlowItem> {
  name: String,
  kind: NodeKind,
  workers: usize,
  queue_size: usize,
  watch_interval: Duration,
  proc: ProcFn<T>,
  tx: mpsc::Sender<Message<T>>,
  rx_slot: StdMutex<Option<mpsc::Receiver<Message<T>>>>,
  edges: StdMutex<Vec<Edge<T>>>,
  upstreams: StdMutex<Vec<Upstream>>,
  serial: StdMutex<Vec<usize>>,
  flags: LifecycleFlags,
  accepting: AtomicBool,
  workers_alive: AtomicUsize,
  stats: Arc<NodeStats>,
}

/// A pipeline stage. Cheap to clone; clones share the same queue, workers
/// and edges.
pub struct Node<T: FlowItem> {
  inner: Arc<Inner<T>>,
}

impl<T: FlowItem> Clone for Node<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: FlowItem> std::fmt::Debug for Node<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Node")
      .field("name", &self.inner.name)
      .field("workers", &self.inner.workers)
      .field("queue_size", &self.inner.queue_size)
      .field("running", &self.inner.flags.is_running())
      .finish()
  }
}

fn lock<L>(mutex: &StdMutex<L>) -> MutexGuard<'_, L> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: FlowItem> Node<T> {
  /// Builds a stage that maps each item to one output.
  pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
  {
    Self::with_config(name, NodeConfig::default(), f)
  }

  /// [`Node::new`] with explicit configuration.
  pub fn with_config<F, Fut>(name: impl Into<String>, config: NodeConfig, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
  {
    let name = name.into();
    let proc = wrap_map(name.clone(), f);
    Self::build(name, config, NodeKind::Transform, proc)
  }

  /// Builds a stage whose function yields a sequence per input; each
  /// yielded value is forwarded as a separate output.
  pub fn expanding<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, StageError>> + Send + 'static,
  {
    Self::expanding_with_config(name, NodeConfig::default(), f)
  }

  /// [`Node::expanding`] with explicit configuration.
  pub fn expanding_with_config<F, Fut>(name: impl Into<String>, config: NodeConfig, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, StageError>> + Send + 'static,
  {
    let name = name.into();
    let proc = wrap_expand(name.clone(), f);
    Self::build(name, config, NodeKind::Transform, proc)
  }

  /// Builds a stage that may drop items: `None` outputs are discarded
  /// instead of forwarded.
  pub fn filtering<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>, StageError>> + Send + 'static,
  {
    Self::filtering_with_config(name, NodeConfig::default(), f)
  }

  /// [`Node::filtering`] with explicit configuration.
  pub fn filtering_with_config<F, Fut>(name: impl Into<String>, config: NodeConfig, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>, StageError>> + Send + 'static,
  {
    let name = name.into();
    let proc = wrap_filter(name.clone(), f);
    Self::build(name, config, NodeKind::Transform, proc)
  }

  /// Builds a stage that sees failures: its function receives the raw
  /// [`Payload`] and may recover a failed item into a live one.
  pub fn recovering<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(Payload<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
  {
    Self::recovering_with_config(name, NodeConfig::default(), f)
  }

  /// [`Node::recovering`] with explicit configuration.
  pub fn recovering_with_config<F, Fut>(name: impl Into<String>, config: NodeConfig, f: F) -> Self
  where
    F: Fn(Payload<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
  {
    let name = name.into();
    let proc = wrap_recover(name.clone(), f);
    Self::build(name, config, NodeKind::Transform, proc)
  }

  /// Builds a terminal stage: consumes items, produces nothing, accepts no
  /// outgoing edges.
  pub fn sink<F, Fut>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
  {
    Self::sink_with_config(name, NodeConfig::default(), f)
  }

  /// [`Node::sink`] with explicit configuration.
  pub fn sink_with_config<F, Fut>(name: impl Into<String>, config: NodeConfig, f: F) -> Self
  where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
  {
    let name = name.into();
    let proc = wrap_sink(name.clone(), f);
    Self::build(name, config, NodeKind::Sink, proc)
  }

  fn build(name: String, config: NodeConfig, kind: NodeKind, proc: ProcFn<T>) -> Self {
    let workers = config.workers.max(1);
    let queue_size = config.queue_size.unwrap_or(workers).max(1);
    let (tx, rx) = mpsc::channel(queue_size);
    Self {
      inner: Arc::new(Inner {
        name,
        kind,
        workers,
        queue_size,
        watch_interval: config.watch_interval,
        proc,
        tx,
        rx_slot: StdMutex::new(Some(rx)),
        edges: StdMutex::new(Vec::new()),
        upstreams: StdMutex::new(Vec::new()),
        serial: StdMutex::new(Vec::new()),
        flags: LifecycleFlags::default(),
        accepting: AtomicBool::new(true),
        workers_alive: AtomicUsize::new(0),
        stats: Arc::new(NodeStats::default()),
      }),
    }
  }

  /// Items currently queued in the input channel.
  pub fn queue_depth(&self) -> usize {
    self.inner.tx.max_capacity() - self.inner.tx.capacity()
  }

  /// Capacity of the input channel.
  pub fn queue_capacity(&self) -> usize {
    self.inner.queue_size
  }

  /// Worker task count.
  pub fn workers(&self) -> usize {
    self.inner.workers
  }

  /// Execution counters for this node.
  pub fn stats(&self) -> Arc<NodeStats> {
    Arc::clone(&self.inner.stats)
  }

  pub(crate) fn upstream_names(&self) -> Vec<String> {
    lock(&self.inner.upstreams)
      .iter()
      .map(|up| up.name.clone())
      .collect()
  }

  pub(crate) async fn push_item(&self, item: T) -> Result<(), StageError> {
    self.push_payload(Payload::Item(item)).await
  }

  pub(crate) async fn push_payload(&self, payload: Payload<T>) -> Result<(), StageError> {
    if !self.inner.accepting.load(Ordering::SeqCst) {
      return Err(StageError::illegal_argument(
        self.inner.name.as_str(),
        "stage is no longer accepting input",
      ));
    }
    self
      .inner
      .tx
      .send(Message::Payload(payload))
      .await
      .map_err(|_| {
        StageError::illegal_argument(self.inner.name.as_str(), "input queue closed")
      })
  }

  pub(crate) fn link_to(
    &self,
    dst: &Node<T>,
    predicate: Predicate<T>,
    delivery: DeliveryMode,
    register_upstream: bool,
  ) {
    if self.inner.kind == NodeKind::Sink {
      error!(
        node = %self.inner.name,
        dst = %dst.inner.name,
        "sink stages cannot have outgoing edges; connection ignored"
      );
      return;
    }
    if self.inner.flags.is_started() {
      error!(
        node = %self.inner.name,
        dst = %dst.inner.name,
        "wiring after start is ignored; the edge list is frozen"
      );
      return;
    }
    lock(&self.inner.edges).push(Edge {
      target_name: dst.inner.name.clone(),
      target: dst.inner.tx.clone(),
      predicate,
      delivery,
    });
    if register_upstream {
      lock(&dst.inner.upstreams).push(Upstream {
        name: self.inner.name.clone(),
        flags: self.inner.flags.clone(),
      });
    }
  }

  pub(crate) fn replace_criteria(&self, dst_name: &str, predicate: Predicate<T>) {
    if self.inner.flags.is_started() {
      error!(
        node = %self.inner.name,
        dst = dst_name,
        "criteria change after start is ignored; the edge list is frozen"
      );
      return;
    }
    let mut edges = lock(&self.inner.edges);
    match edges.iter_mut().find(|edge| edge.target_name == dst_name) {
      Some(edge) => edge.predicate = predicate,
      None => warn!(
        node = %self.inner.name,
        dst = dst_name,
        "no edge to replace criteria on"
      ),
    }
  }

  fn start_workers(&self) {
    let inner = &self.inner;
    if inner.flags.is_started() {
      warn!(node = %inner.name, "node already started");
      return;
    }
    // Snapshot the wiring; the topology is immutable from here on.
    let route = Arc::new(lock(&inner.edges).clone());
    if inner.kind != NodeKind::Sink && route.is_empty() {
      warn!(
        node = %inner.name,
        "node has no outgoing edges; its outputs will be dropped"
      );
    }
    let receiver = lock(&inner.rx_slot).take();
    let Some(receiver) = receiver else {
      warn!(node = %inner.name, "node receiver already consumed; not starting");
      return;
    };
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    inner.workers_alive.store(inner.workers, Ordering::SeqCst);
    inner.flags.mark_started();
    for worker_id in 0..inner.workers {
      tokio::spawn(worker_loop(
        Arc::clone(&self.inner),
        Arc::clone(&receiver),
        Arc::clone(&route),
        worker_id,
      ));
    }
    if !lock(&inner.upstreams).is_empty() {
      tokio::spawn(watch_upstreams(self.clone()));
    }
    info!(
      node = %inner.name,
      workers = inner.workers,
      queue = inner.queue_size,
      "node started"
    );
  }

  pub(crate) async fn close(&self) {
    let inner = &self.inner;
    if !inner.accepting.swap(false, Ordering::SeqCst) {
      return;
    }
    if !inner.flags.is_started() {
      inner.flags.set_running(false);
      return;
    }
    for _ in 0..inner.workers {
      if inner.tx.send(Message::Stop).await.is_err() {
        break;
      }
    }
    debug!(node = %inner.name, "stop markers enqueued; draining");
  }
}

async fn worker_loop<T: FlowItem>(
  inner: Arc<Inner<T>>,
  receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Message<T>>>>,
  route: Arc<Vec<Edge<T>>>,
  worker_id: usize,
) {
  debug!(node = %inner.name, worker = worker_id, "worker started");
  loop {
    let message = {
      let mut rx = receiver.lock().await;
      rx.recv().await
    };
    let payload = match message {
      Some(Message::Payload(payload)) => payload,
      Some(Message::Stop) | None => break,
    };

    inner.stats.enter();
    let in_flight = scopeguard::guard(Arc::clone(&inner.stats), |stats| stats.leave());
    let started_at = Instant::now();
    let outputs = (inner.proc)(payload).await;
    inner.stats.record(started_at.elapsed());
    for output in outputs {
      deliver(&inner, &route, output).await;
    }
    drop(in_flight);
  }
  if inner.workers_alive.fetch_sub(1, Ordering::SeqCst) == 1 {
    inner.flags.set_running(false);
    info!(node = %inner.name, "all workers finished");
  }
  debug!(node = %inner.name, worker = worker_id, "worker stopped");
}

async fn deliver<T: FlowItem>(inner: &Inner<T>, route: &[Edge<T>], payload: Payload<T>) {
  let matching: Vec<&Edge<T>> = route
    .iter()
    .filter(|edge| (edge.predicate)(&payload))
    .collect();
  if matching.is_empty() {
    if !route.is_empty() {
      trace!(node = %inner.name, "no edge accepted the output; lineage ends");
    }
    return;
  }

  let fanout = matching.len();
  let mut payload = Some(payload);
  for (index, edge) in matching.into_iter().enumerate() {
    let out = if index + 1 == fanout && edge.delivery == DeliveryMode::Transfer {
      payload.take()
    } else {
      payload.clone()
    };
    let Some(out) = out else { break };
    if edge.target.send(Message::Payload(out)).await.is_err() {
      warn!(
        node = %inner.name,
        dst = %edge.target_name,
        "destination queue closed; dropping item"
      );
    }
  }
}

async fn watch_upstreams<T: FlowItem>(node: Node<T>) {
  let interval = node.inner.watch_interval;
  loop {
    tokio::time::sleep(interval).await;
    if !node.inner.flags.is_running() {
      break;
    }
    let upstream_done = {
      let upstreams = lock(&node.inner.upstreams);
      !upstreams.is_empty()
        && upstreams
          .iter()
          .all(|up| up.flags.is_started() && !up.flags.is_running())
    };
    if upstream_done {
      info!(node = %node.inner.name, "all upstream stages stopped; draining");
      node.close().await;
      break;
    }
  }
}

fn wrap_map<T, F, Fut>(stage: String, f: F) -> ProcFn<T>
where
  T: FlowItem,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, StageError>> + Send + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |payload| {
    let f = Arc::clone(&f);
    let stage = stage.clone();
    Box::pin(async move {
      match payload {
        Payload::Failed(failure) => vec![Payload::Failed(failure)],
        Payload::Item(item) => {
          let snapshot = item.clone();
          match f(item).await {
            Ok(out) => vec![Payload::Item(out)],
            Err(err) => fail_or_halt(snapshot, &stage, err),
          }
        }
      }
    })
  })
}

fn wrap_expand<T, F, Fut>(stage: String, f: F) -> ProcFn<T>
where
  T: FlowItem,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Vec<T>, StageError>> + Send + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |payload| {
    let f = Arc::clone(&f);
    let stage = stage.clone();
    Box::pin(async move {
      match payload {
        Payload::Failed(failure) => vec![Payload::Failed(failure)],
        Payload::Item(item) => {
          let snapshot = item.clone();
          match f(item).await {
            Ok(outs) => outs.into_iter().map(Payload::Item).collect(),
            Err(err) => fail_or_halt(snapshot, &stage, err),
          }
        }
      }
    })
  })
}

fn wrap_filter<T, F, Fut>(stage: String, f: F) -> ProcFn<T>
where
  T: FlowItem,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Option<T>, StageError>> + Send + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |payload| {
    let f = Arc::clone(&f);
    let stage = stage.clone();
    Box::pin(async move {
      match payload {
        Payload::Failed(failure) => vec![Payload::Failed(failure)],
        Payload::Item(item) => {
          let snapshot = item.clone();
          match f(item).await {
            Ok(Some(out)) => vec![Payload::Item(out)],
            Ok(None) => Vec::new(),
            Err(err) => fail_or_halt(snapshot, &stage, err),
          }
        }
      }
    })
  })
}

fn wrap_recover<T, F, Fut>(stage: String, f: F) -> ProcFn<T>
where
  T: FlowItem,
  F: Fn(Payload<T>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, StageError>> + Send + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |payload| {
    let f = Arc::clone(&f);
    let stage = stage.clone();
    Box::pin(async move {
      let snapshot = match &payload {
        Payload::Item(item) => item.clone(),
        Payload::Failed(failure) => failure.item.clone(),
      };
      match f(payload).await {
        Ok(out) => vec![Payload::Item(out)],
        Err(err) => fail_or_halt(snapshot, &stage, err),
      }
    })
  })
}

fn wrap_sink<T, F, Fut>(stage: String, f: F) -> ProcFn<T>
where
  T: FlowItem,
  F: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |payload| {
    let f = Arc::clone(&f);
    let stage = stage.clone();
    Box::pin(async move {
      match payload {
        Payload::Failed(failure) => {
          debug!(stage = %stage, failure = %failure, "sink discarded a failed item");
          Vec::new()
        }
        Payload::Item(item) => {
          let snapshot = item.clone();
          if let Err(err) = f(item).await {
            fail_or_halt(snapshot, &stage, err);
          }
          Vec::new()
        }
      }
    })
  })
}

fn fail_or_halt<T: FlowItem>(item: T, stage: &str, err: StageError) -> Vec<Payload<T>> {
  if err.is_halt() {
    debug!(stage = %stage, "lineage halted");
    return Vec::new();
  }
  error!(
    stage = %stage,
    error = %err,
    item = ?item,
    "stage failed; forwarding the failure as a value"
  );
  vec![Payload::Failed(StageFailure::new(item, stage, err))]
}

#[async_trait::async_trait]
impl<T: FlowItem> Stage<T> for Node<T> {
  fn name(&self) -> String {
    self.inner.name.clone()
  }

  fn assign_serial(&self, serial: Vec<usize>) {
    *lock(&self.inner.serial) = serial;
  }

  fn serial(&self) -> Vec<usize> {
    lock(&self.inner.serial).clone()
  }

  fn start(&self) {
    self.start_workers();
  }

  async fn end(&self) {
    self.close().await;
  }

  fn is_started(&self) -> bool {
    self.inner.flags.is_started()
  }

  fn is_running(&self) -> bool {
    self.inner.flags.is_running()
  }

  fn head(&self) -> Option<Node<T>> {
    Some(self.clone())
  }

  fn tail(&self) -> Option<Node<T>> {
    Some(self.clone())
  }

  fn nodes(&self) -> Vec<Node<T>> {
    vec![self.clone()]
  }
}
