//! # Bounded Fan-Out Execution
//!
//! A [`Module`] is a transform that can be applied to a whole
//! [`Dataset`] at once: up to a capped number of invocations run
//! concurrently, the cap being a counting semaphore shared by every call
//! against the same stage (and its clones). The cap protects shared
//! downstream resources — typically a completion endpoint — from unbounded
//! fan-out when a stage is applied to a large batch.
//!
//! Batch results come back as one `Result` per input, in input order; a
//! single item's failure never aborts the batch. A single-item call behaves
//! synchronously: run one invocation under the cap and return its result or
//! error.
//!
//! [`Neuron`] wraps an async closure into a `Module`, the convenience unit
//! for one-call stages.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::dataset::Dataset;
use crate::error::StageError;

/// Default concurrency cap for a stage type.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Builds a concurrency cap to share between stages (or clones of one
/// stage) that must not exceed `permits` concurrent invocations in total.
pub fn concurrency_limit(permits: usize) -> Arc<Semaphore> {
  Arc::new(Semaphore::new(permits.max(1)))
}

/// A batch-applicable transform with a shared concurrency cap.
#[async_trait::async_trait]
pub trait Module: Send + Sync {
  /// Argument bundle consumed by one invocation.
  type Input: Send + 'static;
  /// Result produced by one invocation.
  type Output: Send + 'static;

  /// The transform itself.
  async fn forward(&self, input: Self::Input) -> Result<Self::Output, StageError>;

  /// The concurrency cap shared by all calls against this stage.
  fn limit(&self) -> &Arc<Semaphore>;

  /// Runs one invocation under the cap, returning its result or error.
  async fn call(&self, input: Self::Input) -> Result<Self::Output, StageError> {
    let _permit = self
      .limit()
      .acquire()
      .await
      .map_err(|_| StageError::other("concurrency limiter closed"))?;
    self.forward(input).await
  }

  /// Runs the transform over every bundle in the batch, up to the cap
  /// concurrently, and returns per-item results in input order. An empty
  /// batch returns an empty vector.
  async fn call_batch(
    &self,
    batch: Dataset<Self::Input>,
  ) -> Vec<Result<Self::Output, StageError>> {
    futures::future::join_all(batch.into_iter().map(|input| self.call(input))).await
  }
}

/// A function-backed [`Module`].
pub struct Neuron<I, O, F> {
  name: String,
  limit: Arc<Semaphore>,
  f: F,
  _io: PhantomData<fn(I) -> O>,
}

impl<I, O, F> Neuron<I, O, F> {
  /// Wraps `f` under the default concurrency cap.
  pub fn new(name: impl Into<String>, f: F) -> Self {
    Self::with_limit(name, concurrency_limit(DEFAULT_CONCURRENCY), f)
  }

  /// Wraps `f` under an explicit (possibly shared) cap.
  pub fn with_limit(name: impl Into<String>, limit: Arc<Semaphore>, f: F) -> Self {
    Self {
      name: name.into(),
      limit,
      f,
      _io: PhantomData,
    }
  }

  /// The stage name.
  pub fn name(&self) -> &str {
    &self.name
  }
}

#[async_trait::async_trait]
impl<I, O, F, Fut> Module for Neuron<I, O, F>
where
  I: Send + 'static,
  O: Send + 'static,
  F: Fn(I) -> Fut + Send + Sync,
  Fut: Future<Output = Result<O, StageError>> + Send,
{
  type Input = I;
  type Output = O;

  async fn forward(&self, input: I) -> Result<O, StageError> {
    (self.f)(input).await
  }

  fn limit(&self) -> &Arc<Semaphore> {
    &self.limit
  }
}
