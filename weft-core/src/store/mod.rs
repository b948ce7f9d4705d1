//! Reactive Store
//!
//! This module implements the core state container: cells, the store engine,
//! and continuable async values.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is an immutable descriptor for a unit of state: identity plus
//! optional read/write functions and an initial value. Cells hold no state;
//! they are addresses into a store.
//!
//! ## The store
//!
//! The [`Store`] owns every current value, the dependency graph, and the
//! listener registrations. Reads are memoised against per-cell dependency
//! snapshots; writes propagate through back-edges and notify exactly the
//! listeners whose cell's resolved value changed.
//!
//! ## Async values
//!
//! An async cell's value is an [`Async`] handle that settles when its future
//! completes. Recomputing while in flight *continues* the handle - the same
//! handle is redirected to the newer future and the superseded one is
//! aborted - so stale resolutions never leak into the graph.
//!
//! # Implementation Notes
//!
//! Dependency tracking is explicit: read functions receive a [`ReadCtx`]
//! whose `get` records the edge. This keeps the graph dynamic (dependencies
//! are re-discovered on every recomputation) without any ambient global
//! state.

mod cell;
mod engine;
mod error;
mod future;

pub use cell::{Cell, CellId, Value};
pub use engine::{ReadCtx, Store, Subscription, WriteCtx};
pub use error::StoreError;
pub use future::{Async, AsyncError, AsyncStatus};

pub(crate) use cell::{eq_erased, EqFn, ErasedValue};
