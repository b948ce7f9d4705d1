//! Derived-Value Helpers
//!
//! Thin compositions over the store's four primitive operations. Nothing in
//! this module touches engine internals; each helper exists because it is a
//! recurring consumer pattern, and together they exercise the engine's
//! generality:
//!
//! - [`select`] / [`select_with`] / [`select_async`]: slice selection with
//!   change suppression beyond plain equality
//! - [`with_compare`]: compare-gated writes (veto or dampen updates)
//! - [`with_refresh`] / [`with_lazy_refresh`]: forced recomputation
//! - [`CellFamily`]: keyed, lazily created cells with optional LRU bounds
//! - [`History`]: multi-cell undo/redo with transactional grouping

mod compare;
mod family;
mod history;
mod refresh;
mod select;

pub use compare::with_compare;
pub use family::CellFamily;
pub use history::{History, Tracked};
pub use refresh::{with_lazy_refresh, with_refresh};
pub use select::{select, select_async, select_with};
