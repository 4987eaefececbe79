//! # Error Taxonomy
//!
//! Errors in TaskWeave fall into three kinds:
//!
//! - **Control signals** ([`StageError::Halt`]) — expected termination of one
//!   lineage of work, not a failure.
//! - **Contract violations** ([`StageError::IllegalArgument`]) — malformed
//!   input to a stage, a programming error surfaced early.
//! - **Stage failures** ([`StageError::Other`]) — the stage function failed;
//!   the engine converts it into a [`StageFailure`] value that flows
//!   downstream instead of unwinding the worker, so unrelated in-flight
//!   items are unaffected.
//!
//! A [`StageFailure`] carries the payload that was being processed, the stage
//! name, the source error, a captured backtrace, and a timestamp — enough
//! context for a downstream sink to log, discard, or recover it.

use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Boxed error type used at stage boundaries.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Error returned by a stage function.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
  /// Control signal: this lineage of work terminates here. Not a failure;
  /// the item is dropped without producing a [`StageFailure`].
  #[error("lineage halted")]
  Halt,

  /// A value entering a stage failed a structural precondition. Treated as
  /// a stage-author bug, not a transient failure.
  #[error("illegal argument for stage `{stage}`: {reason}")]
  IllegalArgument {
    /// Name of the stage that rejected the value.
    stage: String,
    /// Why the value was rejected.
    reason: String,
  },

  /// Any other stage failure. Converted to a [`StageFailure`] value by the
  /// executing node.
  #[error("stage failure: {source}")]
  Other {
    /// The underlying error.
    #[from]
    source: BoxError,
  },
}

impl StageError {
  /// Builds a [`StageError::Other`] from anything convertible to a boxed
  /// error (including plain strings).
  pub fn other(source: impl Into<BoxError>) -> Self {
    StageError::Other {
      source: source.into(),
    }
  }

  /// Builds a [`StageError::IllegalArgument`] for the given stage.
  pub fn illegal_argument(stage: impl Into<String>, reason: impl Into<String>) -> Self {
    StageError::IllegalArgument {
      stage: stage.into(),
      reason: reason.into(),
    }
  }

  /// Returns `true` for the [`StageError::Halt`] control signal.
  pub fn is_halt(&self) -> bool {
    matches!(self, StageError::Halt)
  }
}

/// A failed unit of work, represented as a value.
///
/// When a stage function returns an error (other than [`StageError::Halt`]),
/// the node wraps the input payload and the error into a `StageFailure` and
/// forwards it downstream as that item's output. Stages built with
/// [`Node::new`](crate::node::Node::new) pass failures through untouched;
/// a [`Node::recovering`](crate::node::Node::recovering) stage may inspect
/// and recover them.
#[derive(Debug, Clone)]
pub struct StageFailure<T> {
  /// The payload that was being processed when the failure occurred.
  pub item: T,
  /// Name of the stage whose function failed.
  pub stage: String,
  /// The original error. Shared so the failure stays cheap to clone on
  /// fan-out edges.
  pub error: Arc<StageError>,
  /// Backtrace captured at the point the failure was recorded.
  pub backtrace: String,
  /// When the failure was recorded.
  pub at: chrono::DateTime<chrono::Utc>,
}

impl<T> StageFailure<T> {
  /// Records a new failure for `item` in `stage`.
  pub fn new(item: T, stage: impl Into<String>, error: StageError) -> Self {
    Self {
      item,
      stage: stage.into(),
      error: Arc::new(error),
      backtrace: Backtrace::force_capture().to_string(),
      at: chrono::Utc::now(),
    }
  }

  /// Consumes the failure and returns the payload it carried.
  pub fn into_item(self) -> T {
    self.item
  }
}

impl<T: fmt::Debug> fmt::Display for StageFailure<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "stage `{}` failed on {:?}: {}",
      self.stage, self.item, self.error
    )
  }
}

impl<T: fmt::Debug> Error for StageFailure<T> {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    Some(self.error.as_ref() as &(dyn Error + 'static))
  }
}
