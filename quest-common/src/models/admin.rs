//! Diagnostic snapshot types for the administrative inspection surface

use serde::Serialize;

/// A collection of items together with its size.
///
/// Every diagnostic accessor returns its data in this shape, built from
/// cloned values; snapshots never borrow live internal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeItems<T> {
    pub size: usize,
    pub items: T,
}

impl<T> SizeItems<T> {
    pub fn new(size: usize, items: T) -> Self {
        Self { size, items }
    }
}

impl<T> SizeItems<Vec<T>> {
    /// Wrap a vector, taking the size from its length
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            size: items.len(),
            items,
        }
    }
}
