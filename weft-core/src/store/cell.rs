//! Cell Descriptors
//!
//! A Cell is the fundamental unit of state: an immutable descriptor pairing a
//! unique identity with an optional read (compute) function, an optional
//! write (mutate) function, and an optional initial value. Cells own no
//! state themselves; all current values, dependency edges, and listeners
//! live in a [`Store`](super::engine::Store), so the same cell can be used
//! against several stores at once.
//!
//! # Cell shapes
//!
//! 1. **Primitive** ([`Cell::new`]): an initial value and the default
//!    replace-value write. The roots of the dependency graph.
//!
//! 2. **Derived** ([`Cell::derived`]): a read function that pulls other
//!    cells through a tracking getter. Read-only.
//!
//! 3. **Writable derived** ([`Cell::writable`], [`Cell::with_write`]): a
//!    custom write step, typically fanning out to backing cells or gating
//!    its own committed value.
//!
//! 4. **Async derived** ([`Cell::future`]): the read function returns a
//!    future; the committed value is a continuable [`Async`] handle.
//!
//! Construction is side-effect-free beyond allocating the identity. A cell
//! is never mutated after creation except for its debug label.

use std::any::{Any, TypeId};
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use super::engine::{ReadCtx, WriteCtx};
use super::error::StoreError;
use super::future::{Async, AsyncError};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique cell ID.
fn next_cell_id() -> CellId {
    CellId(CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Unique identifier for a cell.
///
/// Identity is the only meaningful operation on a cell; two handles refer to
/// the same cell exactly when their IDs are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Bound for types a cell can hold.
///
/// `PartialEq` drives all change detection: a commit of an equal value is a
/// no-op, and a dependency snapshot stays fresh while the dependency's
/// current value compares equal to the snapshotted one. Container values
/// should therefore compare cheaply; for slice-level equality control see
/// [`select_with`](crate::ext::select_with).
pub trait Value: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + PartialEq + Send + Sync + 'static {}

/// A committed value, shared between the store, dependency snapshots, and
/// history snapshots. The engine never mutates a committed value.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Monomorphised equality for erased values of one concrete type.
pub(crate) type EqFn = fn(&ErasedValue, &ErasedValue) -> bool;

pub(crate) type ReadFn = Box<dyn Fn(&mut ReadCtx) -> ErasedValue + Send + Sync>;
pub(crate) type WriteFn =
    Box<dyn Fn(&mut WriteCtx, Box<dyn Any + Send>) -> Result<(), StoreError> + Send + Sync>;

pub(crate) fn eq_erased<T: Value>(a: &ErasedValue, b: &ErasedValue) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// The shared, immutable descriptor behind every [`Cell`] handle.
pub(crate) struct CellCore {
    pub(crate) id: CellId,
    pub(crate) read: Option<ReadFn>,
    pub(crate) write: Option<WriteFn>,
    pub(crate) init: Option<ErasedValue>,
    pub(crate) eq: EqFn,
    pub(crate) value_type: TypeId,
    /// Async cells are published on settlement, not through the write batch.
    pub(crate) settles_later: bool,
    /// Diagnostic label; the one mutable field.
    pub(crate) label: RwLock<Option<String>>,
}

/// A typed handle to a cell descriptor.
///
/// `T` is the value type; `A` the write-argument type (defaults to `T`,
/// which is the shape of primitive cells and plain value writes). Handles
/// are cheap to clone and compare by identity.
pub struct Cell<T, A = T> {
    core: Arc<CellCore>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<T, A> Clone for Cell<T, A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<T, A> Cell<T, A> {
    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.core.id
    }

    /// Get the debug label, if one was set.
    pub fn label(&self) -> Option<String> {
        self.core.label.read().clone()
    }

    /// Set the debug label. Labels are diagnostic only: they show up in
    /// `Debug` output and tracing events, never in engine behavior.
    pub fn set_label(&self, label: impl Into<String>) {
        *self.core.label.write() = Some(label.into());
    }

    /// Builder-style variant of [`set_label`](Cell::set_label).
    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.set_label(label);
        self
    }

    pub(crate) fn core(&self) -> &Arc<CellCore> {
        &self.core
    }
}

impl<T: Value> Cell<T> {
    /// Create a primitive cell holding `init` until first written.
    ///
    /// Writing a primitive cell replaces its value (the default write).
    pub fn new(init: T) -> Cell<T> {
        Cell {
            core: Arc::new(CellCore {
                id: next_cell_id(),
                read: None,
                write: None,
                init: Some(Arc::new(init)),
                eq: eq_erased::<T>,
                value_type: TypeId::of::<T>(),
                settles_later: false,
                label: RwLock::new(None),
            }),
            _marker: PhantomData,
        }
    }

    /// Create a read-only derived cell.
    ///
    /// Every cell pulled through the context's [`get`](ReadCtx::get) becomes
    /// a dependency of this cell for the duration of that computation;
    /// dependencies are re-discovered from scratch on each recomputation, so
    /// conditional reads are tracked correctly.
    pub fn derived<F>(read: F) -> Cell<T>
    where
        F: Fn(&mut ReadCtx) -> T + Send + Sync + 'static,
    {
        Cell {
            core: Arc::new(CellCore {
                id: next_cell_id(),
                read: Some(erase_read(read)),
                write: None,
                init: None,
                eq: eq_erased::<T>,
                value_type: TypeId::of::<T>(),
                settles_later: false,
                label: RwLock::new(None),
            }),
            _marker: PhantomData,
        }
    }

    /// Create an async derived cell.
    ///
    /// The read function runs synchronously (establishing dependencies
    /// through the context) and returns a future; the committed value is an
    /// [`Async<T>`] handle that settles when the future completes. Recomputing
    /// the cell while the previous future is still in flight redirects the
    /// existing handle to the new future and aborts the superseded one.
    ///
    /// Requires a Tokio runtime: futures are driven by spawned tasks.
    pub fn future<F, Fut>(read: F) -> Cell<Async<T>>
    where
        F: Fn(&mut ReadCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Cell::future_result(move |ctx| {
            let fut = read(ctx);
            async move { Ok(fut.await) }
        })
    }

    /// [`Cell::future`] for futures that can themselves fail with an
    /// [`AsyncError`], so severance of an upstream async cell can be
    /// threaded through instead of swallowed.
    pub fn future_result<F, Fut>(read: F) -> Cell<Async<T>>
    where
        F: Fn(&mut ReadCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AsyncError>> + Send + 'static,
    {
        let erased: ReadFn = Box::new(move |ctx: &mut ReadCtx| {
            let fut = read(ctx);
            let boxed: BoxFuture<'static, Result<ErasedValue, AsyncError>> =
                Box::pin(async move { fut.await.map(|v| Arc::new(v) as ErasedValue) });
            let handle: Async<T> = Async::from_slot(ctx.install_future(boxed));
            Arc::new(handle) as ErasedValue
        });
        Cell {
            core: Arc::new(CellCore {
                id: next_cell_id(),
                read: Some(erased),
                write: None,
                init: None,
                eq: eq_erased::<Async<T>>,
                value_type: TypeId::of::<Async<T>>(),
                settles_later: true,
                label: RwLock::new(None),
            }),
            _marker: PhantomData,
        }
    }
}

impl<T: Value, A: Send + 'static> Cell<T, A> {
    /// Create a writable derived cell: a computed view with a custom write
    /// step. The write step usually fans out to the backing cells through
    /// [`WriteCtx::set`], or commits its own value via [`WriteCtx::commit`].
    pub fn writable<R, W>(read: R, write: W) -> Cell<T, A>
    where
        R: Fn(&mut ReadCtx) -> T + Send + Sync + 'static,
        W: Fn(&mut WriteCtx, A) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        let id = next_cell_id();
        Cell {
            core: Arc::new(CellCore {
                id,
                read: Some(erase_read(read)),
                write: Some(erase_write(id, write)),
                init: None,
                eq: eq_erased::<T>,
                value_type: TypeId::of::<T>(),
                settles_later: false,
                label: RwLock::new(None),
            }),
            _marker: PhantomData,
        }
    }

    /// Create a value cell with a custom write step replacing the default
    /// replace-value write. The committed value starts at `init`.
    pub fn with_write<W>(init: T, write: W) -> Cell<T, A>
    where
        W: Fn(&mut WriteCtx, A) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        let id = next_cell_id();
        Cell {
            core: Arc::new(CellCore {
                id,
                read: None,
                write: Some(erase_write(id, write)),
                init: Some(Arc::new(init)),
                eq: eq_erased::<T>,
                value_type: TypeId::of::<T>(),
                settles_later: false,
                label: RwLock::new(None),
            }),
            _marker: PhantomData,
        }
    }
}

fn erase_read<T, R>(read: R) -> ReadFn
where
    T: Value,
    R: Fn(&mut ReadCtx) -> T + Send + Sync + 'static,
{
    Box::new(move |ctx: &mut ReadCtx| Arc::new(read(ctx)) as ErasedValue)
}

fn erase_write<A, W>(id: CellId, write: W) -> WriteFn
where
    A: Send + 'static,
    W: Fn(&mut WriteCtx, A) -> Result<(), StoreError> + Send + Sync + 'static,
{
    Box::new(move |ctx: &mut WriteCtx, arg: Box<dyn Any + Send>| {
        let arg = arg
            .downcast::<A>()
            .map_err(|_| StoreError::TypeMismatch(id))?;
        write(ctx, *arg)
    })
}

impl<T, A> Debug for Cell<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.core.id)
            .field("label", &*self.core.label.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_unique() {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let c = Cell::new(0);

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn clone_shares_identity() {
        let a = Cell::new(1);
        let b = a.clone();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn label_is_mutable_after_creation() {
        let a = Cell::new(0).with_label("count");
        assert_eq!(a.label().as_deref(), Some("count"));

        a.set_label("renamed");
        assert_eq!(a.label().as_deref(), Some("renamed"));
    }

    #[test]
    fn primitive_cells_carry_init_and_default_write() {
        let a = Cell::new(7);
        assert!(a.core().read.is_none());
        assert!(a.core().write.is_none());
        assert!(a.core().init.is_some());
    }

    #[test]
    fn derived_cells_are_read_only() {
        let a: Cell<i32> = Cell::derived(|_| 1);
        assert!(a.core().read.is_some());
        assert!(a.core().write.is_none());
        assert!(a.core().init.is_none());
    }

    #[test]
    fn erased_equality_compares_typed_values() {
        let a: ErasedValue = Arc::new(3_i32);
        let b: ErasedValue = Arc::new(3_i32);
        let c: ErasedValue = Arc::new(4_i32);
        let other: ErasedValue = Arc::new("3".to_string());

        assert!(eq_erased::<i32>(&a, &b));
        assert!(!eq_erased::<i32>(&a, &c));
        // A type mismatch is never equal.
        assert!(!eq_erased::<i32>(&a, &other));
    }
}
