//! # Node Groups
//!
//! A [`NodeGroup`] owns an arbitrary set of stages (nodes or nested groups)
//! and gives them a group-wide lifecycle: starting a group starts every
//! member and launches a watcher that flips the group's `running` flag off
//! once every member has stopped; ending a group signals its entry members
//! and waits for the whole set to drain.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::StageError;
use crate::message::FlowItem;
use crate::node::Node;
use crate::stage::{LifecycleFlags, Stage};

fn lock<L>(mutex: &StdMutex<L>) -> MutexGuard<'_, L> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct GroupInner<T: FlowItem> {
  name: String,
  members: Vec<Arc<dyn Stage<T>>>,
  serial: StdMutex<Vec<usize>>,
  flags: LifecycleFlags,
  watcher: StdMutex<Option<tokio::task::JoinHandle<()>>>,
  watch_interval: Duration,
}

/// A set of stages with a shared lifecycle. Cheap to clone.
pub struct NodeGroup<T: FlowItem> {
  inner: Arc<GroupInner<T>>,
}

impl<T: FlowItem> Clone for NodeGroup<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: FlowItem> NodeGroup<T> {
  /// Builds a group from at least one member.
  pub fn new(
    name: impl Into<String>,
    members: Vec<Arc<dyn Stage<T>>>,
  ) -> Result<Self, StageError> {
    Self::with_watch_interval(name, members, Duration::from_millis(100))
  }

  /// [`NodeGroup::new`] with an explicit watcher cadence.
  pub fn with_watch_interval(
    name: impl Into<String>,
    members: Vec<Arc<dyn Stage<T>>>,
    watch_interval: Duration,
  ) -> Result<Self, StageError> {
    let name = name.into();
    if members.is_empty() {
      return Err(StageError::illegal_argument(
        name,
        "a node group needs at least one member",
      ));
    }
    Ok(Self {
      inner: Arc::new(GroupInner {
        name,
        members,
        serial: StdMutex::new(Vec::new()),
        flags: LifecycleFlags::default(),
        watcher: StdMutex::new(None),
        watch_interval,
      }),
    })
  }

  /// The group's members, in declaration order.
  pub fn members(&self) -> &[Arc<dyn Stage<T>>] {
    &self.inner.members
  }

  /// Members that no other member of this group feeds: the ones `end()`
  /// signals. Cycle-back edges do not count as feeding.
  fn entry_members(&self) -> Vec<Arc<dyn Stage<T>>> {
    let mut leaf_owner: Vec<HashSet<String>> = Vec::new();
    for member in &self.inner.members {
      leaf_owner.push(
        member
          .nodes()
          .iter()
          .map(|node| Stage::name(node))
          .collect(),
      );
    }

    let mut entries = Vec::new();
    for (index, member) in self.inner.members.iter().enumerate() {
      let upstreams: Vec<String> = member
        .head()
        .map(|head| head.upstream_names())
        .unwrap_or_default();
      let fed_from_inside = upstreams.iter().any(|up| {
        leaf_owner
          .iter()
          .enumerate()
          .any(|(other, leaves)| other != index && leaves.contains(up))
      });
      if !fed_from_inside {
        entries.push(Arc::clone(member));
      }
    }
    entries
  }

  /// Waits until the watcher observed every member stopped.
  pub(crate) async fn await_drained(&self) {
    let handle = lock(&self.inner.watcher).take();
    if let Some(handle) = handle {
      let _ = handle.await;
    } else {
      // A concurrent end() took the handle; fall back to polling.
      while self.inner.flags.is_running() {
        tokio::time::sleep(self.inner.watch_interval).await;
      }
    }
  }

  pub(crate) fn start_members(&self) {
    let inner = &self.inner;
    if inner.flags.is_started() {
      tracing::warn!(group = %inner.name, "group already started");
      return;
    }
    let base = lock(&inner.serial).clone();
    for (index, member) in inner.members.iter().enumerate() {
      let mut serial = base.clone();
      serial.push(index);
      member.assign_serial(serial);
      member.start();
    }
    inner.flags.mark_started();

    let members: Vec<Arc<dyn Stage<T>>> = inner.members.clone();
    let flags = inner.flags.clone();
    let interval = inner.watch_interval;
    let group_name = inner.name.clone();
    let handle = tokio::spawn(async move {
      loop {
        tokio::time::sleep(interval).await;
        if members.iter().all(|member| !member.is_running()) {
          flags.set_running(false);
          debug!(group = %group_name, "all members stopped");
          break;
        }
      }
    });
    *lock(&inner.watcher) = Some(handle);
    info!(group = %inner.name, members = inner.members.len(), "group started");
  }

  pub(crate) async fn end_from_entries(&self) {
    for entry in self.entry_members() {
      entry.end().await;
    }
    self.await_drained().await;
  }
}

#[async_trait::async_trait]
impl<T: FlowItem> Stage<T> for NodeGroup<T> {
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
    self.start_members();
  }

  async fn end(&self) {
    self.end_from_entries().await;
  }

  fn is_started(&self) -> bool {
    self.inner.flags.is_started()
  }

  fn is_running(&self) -> bool {
    self.inner.flags.is_running()
  }

  fn head(&self) -> Option<Node<T>> {
    None
  }

  fn tail(&self) -> Option<Node<T>> {
    None
  }

  fn nodes(&self) -> Vec<Node<T>> {
    self
      .inner
      .members
      .iter()
      .flat_map(|member| member.nodes())
      .collect()
  }
}
