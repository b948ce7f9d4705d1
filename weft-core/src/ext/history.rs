//! Undo/redo history.
//!
//! A [`History`] watches writes to a set of tracked cells and keeps
//! per-step snapshots of their values, entirely through the store's public
//! operations: `subscribe` observes committed steps, `read` captures
//! snapshots, `write` restores them. Restores are muted so they never
//! record steps of their own.
//!
//! Consecutive listener calls within one flush see identical post-write
//! state, so duplicate snapshots are coalesced: one user-visible write is
//! one undo step no matter how many tracked cells it touched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::store::{eq_erased, Cell, EqFn, ErasedValue, Store, StoreError, Subscription, Value};

/// Type-erased handle to one tracked cell.
///
/// Tracked cells must be value-writable (`Cell<T, T>`): restoring a
/// snapshot writes the saved value back through the cell's ordinary write
/// path.
pub struct Tracked {
    read: Box<dyn Fn(&Store) -> ErasedValue + Send + Sync>,
    write: Box<dyn Fn(&Store, &ErasedValue) -> Result<(), StoreError> + Send + Sync>,
    eq: EqFn,
    subscribe: Box<dyn Fn(&Store, Box<dyn Fn() + Send + Sync>) -> Subscription + Send + Sync>,
}

impl Tracked {
    pub fn new<T: Value>(cell: &Cell<T, T>) -> Self {
        let read_cell = cell.clone();
        let write_cell = cell.clone();
        let sub_cell = cell.clone();
        Self {
            read: Box::new(move |store: &Store| Arc::new(store.read(&read_cell)) as ErasedValue),
            write: Box::new(move |store: &Store, value: &ErasedValue| {
                let value = value
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or(StoreError::TypeMismatch(write_cell.id()))?;
                store.write(&write_cell, value)
            }),
            eq: eq_erased::<T>,
            subscribe: Box::new(move |store: &Store, listener: Box<dyn Fn() + Send + Sync>| {
                store.subscribe(&sub_cell, listener)
            }),
        }
    }
}

type Snapshot = Vec<ErasedValue>;

struct Timeline {
    past: Vec<Snapshot>,
    present: Snapshot,
    future: Vec<Snapshot>,
}

struct HistoryInner {
    store: Store,
    cells: Vec<Tracked>,
    timeline: Mutex<Timeline>,
    /// Set while restoring, so restores do not record steps.
    muted: AtomicBool,
}

/// Undo/redo over a fixed set of tracked cells in one store.
pub struct History {
    inner: Arc<HistoryInner>,
    _subs: Vec<Subscription>,
}

impl History {
    /// Start tracking. The current values of the tracked cells become the
    /// baseline state.
    pub fn new(store: &Store, cells: Vec<Tracked>) -> Self {
        let present = capture(store, &cells);
        let inner = Arc::new(HistoryInner {
            store: store.clone(),
            cells,
            timeline: Mutex::new(Timeline {
                past: Vec::new(),
                present,
                future: Vec::new(),
            }),
            muted: AtomicBool::new(false),
        });
        let subs = inner
            .cells
            .iter()
            .map(|cell| {
                let recorder = Arc::clone(&inner);
                (cell.subscribe)(store, Box::new(move || recorder.record()))
            })
            .collect();
        Self {
            inner,
            _subs: subs,
        }
    }

    /// Step back. Returns false when there is nothing to undo.
    pub fn undo(&self) -> Result<bool, StoreError> {
        let target = self.inner.timeline.lock().past.last().cloned();
        let Some(target) = target else {
            return Ok(false);
        };
        self.inner.restore(&target)?;
        let mut timeline = self.inner.timeline.lock();
        timeline.past.pop();
        let displaced = std::mem::replace(&mut timeline.present, target);
        timeline.future.push(displaced);
        Ok(true)
    }

    /// Step forward. Returns false when there is nothing to redo.
    pub fn redo(&self) -> Result<bool, StoreError> {
        let target = self.inner.timeline.lock().future.last().cloned();
        let Some(target) = target else {
            return Ok(false);
        };
        self.inner.restore(&target)?;
        let mut timeline = self.inner.timeline.lock();
        timeline.future.pop();
        let displaced = std::mem::replace(&mut timeline.present, target);
        timeline.past.push(displaced);
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        !self.inner.timeline.lock().past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.inner.timeline.lock().future.is_empty()
    }

    /// Group several writes into a single undo step.
    ///
    /// Writes made inside `f` record no individual steps. On `Ok`, the net
    /// change (if any) is committed as one step; on `Err`, every tracked
    /// cell is rolled back to its pre-transaction value and nothing is
    /// recorded.
    pub fn transaction<R, E>(&self, f: impl FnOnce(&Store) -> Result<R, E>) -> Result<R, E> {
        let rollback = capture(&self.inner.store, &self.inner.cells);
        let result = {
            let _mute = MuteGuard::engage(&self.inner.muted);
            f(&self.inner.store)
        };
        match result {
            Ok(value) => {
                let snapshot = capture(&self.inner.store, &self.inner.cells);
                let mut timeline = self.inner.timeline.lock();
                if !snapshots_equal(&self.inner.cells, &timeline.present, &snapshot) {
                    let displaced = std::mem::replace(&mut timeline.present, snapshot);
                    timeline.past.push(displaced);
                    timeline.future.clear();
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(err) = self.inner.restore(&rollback) {
                    error!(%err, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl HistoryInner {
    fn record(&self) {
        if self.muted.load(Ordering::SeqCst) {
            return;
        }
        let snapshot = capture(&self.store, &self.cells);
        let mut timeline = self.timeline.lock();
        // One flush notifies once per changed tracked cell; every call after
        // the first sees the same post-write state.
        if snapshots_equal(&self.cells, &timeline.present, &snapshot) {
            return;
        }
        let displaced = std::mem::replace(&mut timeline.present, snapshot);
        timeline.past.push(displaced);
        timeline.future.clear();
    }

    fn restore(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let _mute = MuteGuard::engage(&self.muted);
        self.cells
            .iter()
            .zip(snapshot)
            .try_for_each(|(cell, value)| (cell.write)(&self.store, value))
    }
}

struct MuteGuard<'a>(&'a AtomicBool);

impl<'a> MuteGuard<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for MuteGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn capture(store: &Store, cells: &[Tracked]) -> Snapshot {
    cells.iter().map(|cell| (cell.read)(store)).collect()
}

fn snapshots_equal(cells: &[Tracked], a: &Snapshot, b: &Snapshot) -> bool {
    a.len() == b.len()
        && cells
            .iter()
            .zip(a.iter().zip(b))
            .all(|(cell, (x, y))| (cell.eq)(x, y))
}
