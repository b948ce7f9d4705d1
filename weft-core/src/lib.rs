//! Weft Core
//!
//! This crate provides the engine for the Weft fine-grained reactive state
//! store. It implements:
//!
//! - Cell descriptors (primitive, derived, writable, and async cells)
//! - The store engine: dependency tracking, memoised recomputation, change
//!   propagation, and the subscription protocol
//! - Continuable async values with stale-computation cancellation
//! - Helper compositions (selection, compare-gated writes, refresh, keyed
//!   families, undo/redo history) built entirely on the store primitives
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `store`: the core engine - everything stateful lives here
//! - `ext`: derived-value helpers that only ever call the store's public
//!   operations
//!
//! # Example
//!
//! ```rust
//! use weft_core::store::{Cell, Store};
//!
//! let store = Store::new();
//!
//! // A primitive cell and a derived view over it.
//! let count = Cell::new(1);
//! let doubled = {
//!     let count = count.clone();
//!     Cell::derived(move |ctx| ctx.get(&count) * 2)
//! };
//!
//! assert_eq!(store.read(&doubled), 2);
//!
//! store.write(&count, 5).unwrap();
//! assert_eq!(store.read(&doubled), 10);
//! ```

pub mod ext;
pub mod store;
