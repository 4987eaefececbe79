//! # Identity Labels
//!
//! A [`Labeled`] value pairs a payload with a stable label — a content hash
//! taken once at creation and never recomputed as the payload mutates. When
//! an item re-enters a stage via a cyclic edge, the label lets any stage
//! recognize "this is iteration N of the same logical unit" without
//! inspecting payload internals.
//!
//! The [`labeled`] adapter makes label-preservation transparent to stage
//! authors: it unwraps the payload, applies the stage function, and rewraps
//! the result with the original label.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::StageError;

/// A payload paired with a stable identity label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labeled<T> {
  label: String,
  item: T,
}

impl<T: Serialize> Labeled<T> {
  /// Wraps `item`, deriving the label from its content at this moment.
  pub fn new(item: T) -> Self {
    let label = content_label(&item);
    Self { label, item }
  }
}

impl<T> Labeled<T> {
  /// Wraps `item` under an explicit label.
  pub fn with_label(item: T, label: impl Into<String>) -> Self {
    Self {
      label: label.into(),
      item,
    }
  }

  /// The identity label.
  pub fn label(&self) -> &str {
    &self.label
  }

  /// The wrapped payload.
  pub fn item(&self) -> &T {
    &self.item
  }

  /// Mutable access to the wrapped payload. The label is not recomputed.
  pub fn item_mut(&mut self) -> &mut T {
    &mut self.item
  }

  /// Splits into `(label, item)`.
  pub fn into_parts(self) -> (String, T) {
    (self.label, self.item)
  }

  /// Transforms the payload while keeping the label.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Labeled<U> {
    Labeled {
      label: self.label,
      item: f(self.item),
    }
  }
}

/// Derives a stable content label: the SHA-256 digest of the value's JSON
/// form, hex-encoded.
pub fn content_label<T: Serialize>(item: &T) -> String {
  let bytes = serde_json::to_vec(item).unwrap_or_else(|err| err.to_string().into_bytes());
  format!("{:x}", Sha256::digest(bytes))
}

/// Boxed future returned by [`labeled`]-adapted stage functions.
pub type LabeledFuture<T> = Pin<Box<dyn Future<Output = Result<Labeled<T>, StageError>> + Send>>;

/// Adapts a stage function on `T` into one on [`Labeled<T>`], rewrapping the
/// result with the original label.
///
/// ```ignore
/// let refine = Node::new("refine", labeled(|survey: Survey| async move {
///     Ok(refine_survey(survey).await?)
/// }));
/// ```
pub fn labeled<T, F, Fut>(f: F) -> impl Fn(Labeled<T>) -> LabeledFuture<T> + Send + Sync + Clone
where
  T: Send + 'static,
  F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = Result<T, StageError>> + Send + 'static,
{
  move |wrapped: Labeled<T>| {
    let f = f.clone();
    Box::pin(async move {
      let (label, item) = wrapped.into_parts();
      let out = f(item).await?;
      Ok(Labeled::with_label(out, label))
    })
  }
}
