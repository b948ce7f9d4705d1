//! Store error types.

use thiserror::Error;

use super::cell::CellId;

/// Errors surfaced by store write operations.
///
/// Read-path failures (dependency cycles, reading a cell that has neither a
/// value nor an initial value) are programming bugs and panic instead; see
/// the `Store::read` documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The cell has a read function but no write function.
    #[error("{0} is read-only")]
    ReadOnly(CellId),

    /// A type-erased write did not match the cell's value type.
    #[error("value type mismatch for {0}")]
    TypeMismatch(CellId),

    /// A write function asked for its own value before one was committed
    /// and the cell has no initial value.
    #[error("{0} has no committed value and no initial value")]
    Uninitialized(CellId),
}
