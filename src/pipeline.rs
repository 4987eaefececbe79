//! # Pipelines
//!
//! A [`Pipeline`] is a [`NodeGroup`] with a designated head and tail, which
//! makes the whole group behave like a single node: `put` feeds the head,
//! `connect` wires the tail. Pipelines therefore nest — a pipeline can be a
//! member of a bigger pipeline.
//!
//! [`Sequential`] is the common case: members wired in declaration order
//! with the always-true predicate, the straight-line handoff used for
//! linear phases.
//!
//! Cycles are ordinary edges whose destination sits earlier in the same
//! group; the engine imposes no DAG constraint. Termination is the
//! predicates' responsibility — for example "forward back into the loop
//! only while the iteration count is under the limit":
//!
//! ```ignore
//! refine.connect_cycle(&digest, on_item(|s: &Survey| s.round < 3));
//! refine.connect_when(&assemble, when(|p| p.item().is_none_or(|s| s.round >= 3)));
//! ```

use std::sync::Arc;

use crate::error::StageError;
use crate::group::NodeGroup;
use crate::message::FlowItem;
use crate::node::Node;
use crate::stage::Stage;

/// A node group that composes like a single node via a designated head and
/// tail. Cheap to clone.
pub struct Pipeline<T: FlowItem> {
  group: NodeGroup<T>,
  head: Arc<dyn Stage<T>>,
  tail: Arc<dyn Stage<T>>,
}

impl<T: FlowItem> std::fmt::Debug for Pipeline<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("head", &self.head.name())
      .field("tail", &self.tail.name())
      .finish()
  }
}

impl<T: FlowItem> Clone for Pipeline<T> {
  fn clone(&self) -> Self {
    Self {
      group: self.group.clone(),
      head: Arc::clone(&self.head),
      tail: Arc::clone(&self.tail),
    }
  }
}

impl<T: FlowItem> Pipeline<T> {
  /// Builds a pipeline whose head is the first member and tail the last.
  pub fn new(
    name: impl Into<String>,
    members: Vec<Arc<dyn Stage<T>>>,
  ) -> Result<Self, StageError> {
    let head = 0;
    let tail = members.len().saturating_sub(1);
    Self::with_bounds(name, members, head, tail)
  }

  /// Builds a pipeline with explicit head/tail members, given by index.
  /// Head and tail must be members of the group.
  pub fn with_bounds(
    name: impl Into<String>,
    members: Vec<Arc<dyn Stage<T>>>,
    head_index: usize,
    tail_index: usize,
  ) -> Result<Self, StageError> {
    let name = name.into();
    if head_index >= members.len() || tail_index >= members.len() {
      return Err(StageError::illegal_argument(
        name,
        "pipeline head and tail must be members of the group",
      ));
    }
    let head = Arc::clone(&members[head_index]);
    let tail = Arc::clone(&members[tail_index]);
    let group = NodeGroup::new(name, members)?;
    Ok(Self { group, head, tail })
  }

  /// The underlying group.
  pub fn group(&self) -> &NodeGroup<T> {
    &self.group
  }
}

#[async_trait::async_trait]
impl<T: FlowItem> Stage<T> for Pipeline<T> {
  fn name(&self) -> String {
    Stage::name(&self.group)
  }

  fn assign_serial(&self, serial: Vec<usize>) {
    self.group.assign_serial(serial);
  }

  fn serial(&self) -> Vec<usize> {
    self.group.serial()
  }

  fn start(&self) {
    self.group.start_members();
  }

  /// Ends the designated head, then waits for the cascade — every
  /// downstream member drains once its upstreams stop — to finish.
  async fn end(&self) {
    self.head.end().await;
    self.group.await_drained().await;
  }

  fn is_started(&self) -> bool {
    self.group.is_started()
  }

  fn is_running(&self) -> bool {
    self.group.is_running()
  }

  fn head(&self) -> Option<Node<T>> {
    self.head.head()
  }

  fn tail(&self) -> Option<Node<T>> {
    self.tail.tail()
  }

  fn nodes(&self) -> Vec<Node<T>> {
    self.group.nodes()
  }
}

/// A pipeline wired linearly in declaration order with the default
/// always-true predicate.
pub struct Sequential<T: FlowItem> {
  pipeline: Pipeline<T>,
}

impl<T: FlowItem> Clone for Sequential<T> {
  fn clone(&self) -> Self {
    Self {
      pipeline: self.pipeline.clone(),
    }
  }
}

impl<T: FlowItem> Sequential<T> {
  /// Builds the pipeline and connects consecutive members.
  pub fn new(
    name: impl Into<String>,
    members: Vec<Arc<dyn Stage<T>>>,
  ) -> Result<Self, StageError> {
    for pair in members.windows(2) {
      pair[0].connect(pair[1].as_ref());
    }
    Ok(Self {
      pipeline: Pipeline::new(name, members)?,
    })
  }

  /// The underlying pipeline.
  pub fn pipeline(&self) -> &Pipeline<T> {
    &self.pipeline
  }
}

#[async_trait::async_trait]
impl<T: FlowItem> Stage<T> for Sequential<T> {
  fn name(&self) -> String {
    Stage::name(&self.pipeline)
  }

  fn assign_serial(&self, serial: Vec<usize>) {
    self.pipeline.assign_serial(serial);
  }

  fn serial(&self) -> Vec<usize> {
    self.pipeline.serial()
  }

  fn start(&self) {
    Stage::start(&self.pipeline);
  }

  async fn end(&self) {
    Stage::end(&self.pipeline).await;
  }

  fn is_started(&self) -> bool {
    self.pipeline.is_started()
  }

  fn is_running(&self) -> bool {
    self.pipeline.is_running()
  }

  fn head(&self) -> Option<Node<T>> {
    self.pipeline.head()
  }

  fn tail(&self) -> Option<Node<T>> {
    self.pipeline.tail()
  }

  fn nodes(&self) -> Vec<Node<T>> {
    self.pipeline.nodes()
  }
}
