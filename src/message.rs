//! # Tagged Payloads
//!
//! Values flow through the engine as [`Payload`]s: a tagged enum with a
//! success variant and a failure variant. Stages branch on the tag at their
//! boundary instead of inspecting runtime types, and failures travel the
//! same edges as live items until a sink disposes of them.

use crate::error::StageFailure;

/// Bounds required of every item type flowing through a pipeline.
///
/// Items must be cloneable (fan-out edges and failure records), printable
/// for diagnostics, and sendable across worker tasks. Implemented
/// automatically for every qualifying type.
pub trait FlowItem: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> FlowItem for T {}

/// A value travelling along pipeline edges: either a live item or a failed
/// one converted to data (error-as-value).
#[derive(Debug, Clone)]
pub enum Payload<T> {
  /// A live item.
  Item(T),
  /// A failed item, carried as a value so downstream stages can handle,
  /// skip, or discard it.
  Failed(StageFailure<T>),
}

impl<T> Payload<T> {
  /// Returns a reference to the live item, if any.
  pub fn item(&self) -> Option<&T> {
    match self {
      Payload::Item(item) => Some(item),
      Payload::Failed(_) => None,
    }
  }

  /// Returns a reference to the failure record, if any.
  pub fn failure(&self) -> Option<&StageFailure<T>> {
    match self {
      Payload::Item(_) => None,
      Payload::Failed(failure) => Some(failure),
    }
  }

  /// Returns `true` when this payload carries a failure.
  pub fn is_failed(&self) -> bool {
    matches!(self, Payload::Failed(_))
  }

  /// Consumes the payload, returning the live item or the failure record.
  pub fn into_item(self) -> Result<T, StageFailure<T>> {
    match self {
      Payload::Item(item) => Ok(item),
      Payload::Failed(failure) => Err(failure),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::StageError;

  #[test]
  fn payload_accessors_follow_the_tag() {
    let live = Payload::Item(7u32);
    assert_eq!(live.item(), Some(&7));
    assert!(!live.is_failed());

    let failed: Payload<u32> = Payload::Failed(StageFailure::new(7, "map", StageError::other("x")));
    assert!(failed.is_failed());
    assert!(failed.item().is_none());
    assert_eq!(failed.into_item().unwrap_err().item, 7);
  }
}
