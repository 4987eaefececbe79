//! # Batch Normalization
//!
//! A [`Dataset`] is the normalized unit of work for the fan-out executor:
//! an ordered sequence of argument bundles, one per transform invocation.
//! The bundle type `T` is the transform's input — a single value or a tuple
//! of positional arguments — so an iterable of tuples passes through
//! unchanged and an iterable of bare values becomes one bundle per value.

/// An ordered batch of argument bundles for positional dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset<T> {
  items: Vec<T>,
}

impl<T> Dataset<T> {
  /// Builds a dataset holding exactly one bundle.
  pub fn single(item: T) -> Self {
    Self { items: vec![item] }
  }

  /// Number of bundles in the batch.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// Returns `true` when the batch holds no bundles.
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Iterates the bundles in insertion order.
  pub fn iter(&self) -> std::slice::Iter<'_, T> {
    self.items.iter()
  }
}

impl<T> From<Vec<T>> for Dataset<T> {
  fn from(items: Vec<T>) -> Self {
    Self { items }
  }
}

impl<T> FromIterator<T> for Dataset<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

impl<T> IntoIterator for Dataset<T> {
  type Item = T;
  type IntoIter = std::vec::IntoIter<T>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.into_iter()
  }
}

impl<'a, T> IntoIterator for &'a Dataset<T> {
  type Item = &'a T;
  type IntoIter = std::slice::Iter<'a, T>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
