//! Store Engine
//!
//! The store owns all mutable state: current values, dependency edges in
//! both directions, per-cell dependency snapshots, the pending write batch,
//! and listener registrations. Cells themselves are immutable descriptors;
//! everything observable happens here.
//!
//! # How It Works
//!
//! 1. `read` checks the cell's cached value against its dependency
//!    snapshot. The cache is fresh iff every dependency's current value
//!    still compares equal to the value recorded when the cell last
//!    computed. Fresh reads return the cache untouched.
//!
//! 2. A stale (or first) read clears the cell's snapshot and back-edges,
//!    then reruns its read function. The [`ReadCtx`] getter re-records an
//!    edge and a snapshot entry per dependency actually touched, so
//!    conditional dependencies are tracked correctly on every run.
//!
//! 3. `write` runs the cell's write function (default: replace the value).
//!    Each commit of a changed value records the cell's previous value into
//!    the pending batch.
//!
//! 4. After the top-level write returns, the batch is flushed: dependents of
//!    each changed cell are recomputed, and listeners fire for every cell
//!    whose value actually changed. The batch is drained in a loop so that
//!    writes issued *by listeners* propagate in the same flush.
//!
//! # Locking
//!
//! All store state sits behind one mutex - the single-writer discipline the
//! engine's cross-cell invariants require. The lock is never held across
//! user code (read functions, write functions, listeners); re-entrant calls
//! from any of those take the lock afresh. Async driver tasks are the only
//! cross-thread entrants and follow the same rule.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::cell::{Cell, CellCore, CellId, EqFn, ErasedValue, Value};
use super::error::StoreError;
use super::future::{AsyncError, AsyncSlot};

type Listener = Arc<dyn Fn() + Send + Sync>;
type ListenerId = u64;

/// Per-cell state owned by the store.
struct CellState {
    /// Most recently committed value.
    value: Option<ErasedValue>,
    /// Equality for this cell's value type, captured at registration.
    eq: EqFn,
    /// Who I depend on, and what I last saw them hold. Insertion order is
    /// read order; rebuilt from scratch on every recomputation.
    deps: IndexMap<CellId, ErasedValue>,
    /// Who depends on me (back-edges), used for change propagation.
    dependents: IndexSet<CellId>,
    listeners: SmallVec<[(ListenerId, Listener); 2]>,
    /// Settlement slot, for async cells only.
    slot: Option<Arc<AsyncSlot>>,
}

struct StoreState {
    cells: HashMap<CellId, CellState>,
    /// Weak handles to cell descriptors, so [`Store::collect`] can prune
    /// state for cells nothing references anymore.
    registry: HashMap<CellId, Weak<CellCore>>,
    /// Write-batch accumulator: cell -> value before this batch.
    pending: IndexMap<CellId, ErasedValue>,
    /// Cells currently recomputing, for cycle detection.
    computing: Vec<CellId>,
    flushing: bool,
}

pub(crate) struct StoreInner {
    state: Mutex<StoreState>,
    listener_ids: AtomicU64,
}

/// The reactive store.
///
/// Cheap to clone (handle semantics). All state is internal; the four
/// primitive operations - [`read`](Store::read), [`write`](Store::write),
/// [`subscribe`](Store::subscribe), and cell construction - are the entire
/// contract, with [`clear`](Store::clear) for teardown.
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    cells: HashMap::new(),
                    registry: HashMap::new(),
                    pending: IndexMap::new(),
                    computing: Vec::new(),
                    flushing: false,
                }),
                listener_ids: AtomicU64::new(0),
            }),
        }
    }

    /// Read a cell's current value, recomputing it if stale.
    ///
    /// A cell recomputes only if at least one of its last-seen dependencies
    /// changed since its previous computation.
    ///
    /// # Panics
    ///
    /// Panics on a dependency cycle (a cell transitively reading itself
    /// through the tracked read path), and when a derived cell's read
    /// function panics - exceptions inside read functions are the caller's
    /// to handle, never cached by the store.
    pub fn read<T: Value, A>(&self, cell: &Cell<T, A>) -> T {
        let value = self.read_erased(cell.core());
        value
            .downcast_ref::<T>()
            .expect("stored value matches the cell's value type")
            .clone()
    }

    /// Write a cell and flush the resulting changes.
    ///
    /// Runs the cell's write function with a [`WriteCtx`] (the default write
    /// of a primitive cell replaces its value), then recomputes every cell
    /// transitively affected and fires listeners on each cell whose value
    /// actually changed. A write function returning an error aborts before
    /// any notification: listeners never observe a half-applied write.
    pub fn write<T: Value, A: Send + 'static>(
        &self,
        cell: &Cell<T, A>,
        arg: A,
    ) -> Result<(), StoreError> {
        let mark = self.inner.state.lock().pending.len();
        match self.write_inner(cell, arg) {
            Ok(()) => {
                self.flush();
                Ok(())
            }
            Err(e) => {
                // Suppress notification for the failed write: drop the batch
                // entries it introduced.
                self.inner.state.lock().pending.truncate(mark);
                Err(e)
            }
        }
    }

    /// Read-modify-write convenience for value cells.
    pub fn update<T: Value>(
        &self,
        cell: &Cell<T, T>,
        f: impl FnOnce(T) -> T,
    ) -> Result<(), StoreError> {
        let current = self.read(cell);
        self.write(cell, f(current))
    }

    /// Register a listener for changes to a cell's resolved value.
    ///
    /// The cell is computed first, so notifications are relative to the
    /// value current at subscription time. Listeners take no arguments;
    /// re-read the cell to observe the new value (push signals, pull
    /// values). The returned [`Subscription`] unsubscribes when dropped.
    pub fn subscribe<T, A>(
        &self,
        cell: &Cell<T, A>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let core = cell.core();
        let _ = self.read_erased(core);
        self.flush();

        let id = self.inner.listener_ids.fetch_add(1, Ordering::Relaxed);
        {
            let mut st = self.inner.state.lock();
            if let Some(cs) = st.cells.get_mut(&core.id) {
                cs.listeners.push((id, Arc::new(listener)));
            }
        }
        Subscription {
            store: Arc::downgrade(&self.inner),
            cell: core.id,
            listener: id,
        }
    }

    /// Reset all internal state without destroying the store handle.
    ///
    /// In-flight async values are severed (their driver tasks aborted,
    /// awaiters woken with [`AsyncError::Severed`]). Cells remain usable:
    /// the next read re-registers them from scratch.
    pub fn clear(&self) {
        let slots: Vec<Arc<AsyncSlot>> = {
            let mut st = self.inner.state.lock();
            let slots = st.cells.values().filter_map(|cs| cs.slot.clone()).collect();
            st.cells.clear();
            st.registry.clear();
            st.pending.clear();
            st.computing.clear();
            slots
        };
        for slot in slots {
            slot.sever();
        }
        debug!("store cleared");
    }

    /// Drop state for cells whose every external handle is gone.
    ///
    /// Returns the number of cells pruned. The registry holds cells weakly,
    /// so dropping the last `Cell` handle makes its state collectible here;
    /// the store never keeps an unreachable cell alive.
    pub fn collect(&self) -> usize {
        let (pruned, slots) = {
            let mut st = self.inner.state.lock();
            let dead: Vec<CellId> = st
                .registry
                .iter()
                .filter(|(_, weak)| weak.strong_count() == 0)
                .map(|(id, _)| *id)
                .collect();
            let mut slots = Vec::new();
            for id in &dead {
                st.registry.remove(id);
                st.pending.shift_remove(id);
                if let Some(cs) = st.cells.remove(id) {
                    for dep in cs.deps.keys() {
                        if let Some(ds) = st.cells.get_mut(dep) {
                            ds.dependents.shift_remove(id);
                        }
                    }
                    if let Some(slot) = cs.slot {
                        slots.push(slot);
                    }
                }
            }
            (dead.len(), slots)
        };
        for slot in slots {
            slot.sever();
        }
        if pruned > 0 {
            debug!(pruned, "collected unreachable cells");
        }
        pruned
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    pub(crate) fn read_erased(&self, core: &Arc<CellCore>) -> ErasedValue {
        self.ensure(core);
        let id = core.id;
        {
            let mut st = self.inner.state.lock();
            if let Some(value) = fresh_value(&st, id) {
                return value;
            }
            if st.computing.contains(&id) {
                drop(st);
                let label = core.label.read().clone();
                panic!(
                    "dependency cycle detected while reading {id}{}",
                    label.map(|l| format!(" ({l})")).unwrap_or_default()
                );
            }
            // Dependencies may differ this time: rebuild from scratch.
            sever_dependencies(&mut st, id);
        }

        let candidate = match &core.read {
            Some(read) => {
                trace!(cell = %id, "recompute");
                let _guard = ComputeGuard::enter(self, id);
                let mut ctx = ReadCtx {
                    store: self.clone(),
                    id,
                };
                read(&mut ctx)
            }
            None => core
                .init
                .clone()
                .unwrap_or_else(|| panic!("{id} has neither a read function nor an initial value")),
        };

        self.commit_erased(id, candidate, !core.settles_later)
    }

    /// Commit a candidate value for a cell.
    ///
    /// An equal candidate is a no-op (redundant writes never notify).
    /// Otherwise the previous value (the *first* previous value per batch)
    /// is recorded into the pending batch for the flush to examine. A cell's
    /// first-ever value records nothing: there is no transition to observe.
    fn commit_erased(&self, id: CellId, candidate: ErasedValue, batched: bool) -> ErasedValue {
        let mut st = self.inner.state.lock();
        let old = {
            let cs = st.cells.get_mut(&id).expect("cell state registered");
            if let Some(prev) = &cs.value {
                if (cs.eq)(prev, &candidate) {
                    return prev.clone();
                }
            }
            cs.value.replace(candidate.clone())
        };
        trace!(cell = %id, "commit: value changed");
        if batched {
            if let Some(old) = old {
                st.pending.entry(id).or_insert(old);
            }
        }
        candidate
    }

    /// Commit a value directly to a cell, severing its reactive link to its
    /// former dependencies first. This is the self-set path: a manually
    /// overridden value persists even if the cells that originally computed
    /// it change later.
    fn self_set_erased(&self, id: CellId, value: ErasedValue) {
        {
            let mut st = self.inner.state.lock();
            sever_dependencies(&mut st, id);
        }
        self.commit_erased(id, value, true);
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn write_inner<T: Value, A: Send + 'static>(
        &self,
        cell: &Cell<T, A>,
        arg: A,
    ) -> Result<(), StoreError> {
        let core = cell.core();
        self.ensure(core);
        if let Some(write) = &core.write {
            let mut ctx = WriteCtx {
                store: self.clone(),
                id: core.id,
            };
            write(&mut ctx, Box::new(arg))
        } else if core.read.is_some() {
            Err(StoreError::ReadOnly(core.id))
        } else {
            // Default write: replace the value. `A == T` for every cell
            // built without a write function.
            let boxed: Box<dyn Any> = Box::new(arg);
            let value = boxed
                .downcast::<T>()
                .map_err(|_| StoreError::TypeMismatch(core.id))?;
            self.self_set_erased(core.id, Arc::new(*value));
            Ok(())
        }
    }

    /// Drain the pending batch, recomputing affected cells and firing
    /// listeners for each cell whose resolved value changed.
    ///
    /// The outer loop re-drains until the batch stays empty, so writes made
    /// by listeners during notification propagate within the same flush.
    /// Re-entrant `flush` calls (from such writes) return immediately.
    fn flush(&self) {
        {
            let mut st = self.inner.state.lock();
            if st.flushing || st.pending.is_empty() {
                return;
            }
            st.flushing = true;
        }
        let _guard = FlushGuard { store: self };
        loop {
            let batch: Vec<(CellId, ErasedValue)> = {
                let mut st = self.inner.state.lock();
                st.pending.drain(..).collect()
            };
            if batch.is_empty() {
                break;
            }
            debug!(changes = batch.len(), "flush");
            // Visited set is per drain pass: a diamond-shaped graph
            // recomputes each dependent once per pass.
            let mut visited: HashSet<CellId> = HashSet::new();
            for (id, previous) in batch {
                self.propagate(id, &mut visited);
                let (changed, listeners) = {
                    let st = self.inner.state.lock();
                    match st.cells.get(&id) {
                        Some(cs) => {
                            let changed = cs
                                .value
                                .as_ref()
                                .map(|cur| !(cs.eq)(cur, &previous))
                                .unwrap_or(false);
                            let listeners: Vec<Listener> =
                                cs.listeners.iter().map(|(_, l)| l.clone()).collect();
                            (changed, listeners)
                        }
                        None => (false, Vec::new()),
                    }
                };
                if changed {
                    for listener in listeners {
                        listener();
                    }
                }
            }
        }
    }

    /// Recompute everything downstream of `id`, depth-first over back-edges
    /// via an explicit work stack. Dependents whose recomputed value is
    /// unchanged stop the walk (propagation minimality); changed dependents
    /// were committed into the pending batch and will be notified when their
    /// own entry drains.
    fn propagate(&self, id: CellId, visited: &mut HashSet<CellId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let dependents: Vec<CellId> = {
                let st = self.inner.state.lock();
                st.cells
                    .get(&current)
                    .map(|cs| cs.dependents.iter().copied().collect())
                    .unwrap_or_default()
            };
            for dep_id in dependents {
                if !visited.insert(dep_id) {
                    continue;
                }
                let (core, old, eq) = {
                    let st = self.inner.state.lock();
                    let core = st.registry.get(&dep_id).and_then(Weak::upgrade);
                    let (old, eq) = st
                        .cells
                        .get(&dep_id)
                        .map(|cs| (cs.value.clone(), cs.eq))
                        .unwrap_or((None, eq_never as EqFn));
                    (core, old, eq)
                };
                let Some(core) = core else { continue };
                let new = self.read_erased(&core);
                let changed = match &old {
                    Some(old) => !(eq)(old, &new),
                    None => true,
                };
                if changed {
                    trace!(cell = %dep_id, "propagate: dependent changed");
                    stack.push(dep_id);
                }
            }
        }
    }

    /// Fire the listeners of `id` and, recursively, of every cell in its
    /// back-dependent set. Used for async settlement, where downstream cells
    /// produce new output without their own snapshots changing.
    pub(crate) fn publish(&self, id: CellId) {
        let listeners: Vec<Listener> = {
            let st = self.inner.state.lock();
            let mut seen = HashSet::new();
            let mut queue = vec![id];
            let mut out = Vec::new();
            while let Some(current) = queue.pop() {
                if !seen.insert(current) {
                    continue;
                }
                if let Some(cs) = st.cells.get(&current) {
                    out.extend(cs.listeners.iter().map(|(_, l)| l.clone()));
                    queue.extend(cs.dependents.iter().copied());
                }
            }
            out
        };
        for listener in listeners {
            listener();
        }
    }

    // ------------------------------------------------------------------
    // Async values
    // ------------------------------------------------------------------

    /// Install the future produced by an async cell's read function.
    ///
    /// If the cell's previous value is a still-pending slot, the slot is
    /// redirected to the new future (the superseded driver task is aborted)
    /// and kept - preserving handle identity for everything already awaiting
    /// it. Otherwise a fresh slot is created. Settlement publishes the cell.
    pub(crate) fn install_future(
        &self,
        id: CellId,
        fut: BoxFuture<'static, Result<ErasedValue, AsyncError>>,
    ) -> Arc<AsyncSlot> {
        let existing = {
            let st = self.inner.state.lock();
            st.cells.get(&id).and_then(|cs| cs.slot.clone())
        };
        if let Some(slot) = existing {
            if slot.is_pending() {
                let epoch = slot.supersede();
                debug!(cell = %id, epoch, "async: continuing in-flight value");
                let task = tokio::spawn(drive(
                    Arc::downgrade(&self.inner),
                    id,
                    Arc::clone(&slot),
                    epoch,
                    fut,
                ));
                slot.attach_task(epoch, task);
                return slot;
            }
        }
        let slot = Arc::new(AsyncSlot::new());
        {
            let mut st = self.inner.state.lock();
            if let Some(cs) = st.cells.get_mut(&id) {
                cs.slot = Some(Arc::clone(&slot));
            }
        }
        let epoch = slot.current_epoch();
        let task = tokio::spawn(drive(
            Arc::downgrade(&self.inner),
            id,
            Arc::clone(&slot),
            epoch,
            fut,
        ));
        slot.attach_task(epoch, task);
        slot
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn ensure(&self, core: &Arc<CellCore>) {
        let mut st = self.inner.state.lock();
        let id = core.id;
        st.registry
            .entry(id)
            .or_insert_with(|| Arc::downgrade(core));
        st.cells.entry(id).or_insert_with(|| CellState {
            value: None,
            eq: core.eq,
            deps: IndexMap::new(),
            dependents: IndexSet::new(),
            listeners: SmallVec::new(),
            slot: None,
        });
    }
}

/// Driver for one epoch of an async cell's future.
async fn drive(
    store: Weak<StoreInner>,
    id: CellId,
    slot: Arc<AsyncSlot>,
    epoch: u64,
    fut: BoxFuture<'static, Result<ErasedValue, AsyncError>>,
) {
    let result = fut.await;
    if slot.settle(epoch, result) {
        trace!(cell = %id, "async: settled");
        if let Some(inner) = store.upgrade() {
            Store { inner }.publish(id);
        }
    }
}

/// Cache-freshness check: the cell has a value, and every snapshotted
/// dependency still holds a value equal to the one last seen.
fn fresh_value(st: &StoreState, id: CellId) -> Option<ErasedValue> {
    let cs = st.cells.get(&id)?;
    let value = cs.value.clone()?;
    for (dep, seen) in &cs.deps {
        let ds = st.cells.get(dep)?;
        let current = ds.value.as_ref()?;
        if !(ds.eq)(current, seen) {
            return None;
        }
    }
    Some(value)
}

/// Clear a cell's dependency snapshot and remove it from its dependencies'
/// back-edge sets.
fn sever_dependencies(st: &mut StoreState, id: CellId) {
    let old_deps: Vec<CellId> = match st.cells.get_mut(&id) {
        Some(cs) => cs.deps.drain(..).map(|(dep, _)| dep).collect(),
        None => Vec::new(),
    };
    for dep in old_deps {
        if let Some(ds) = st.cells.get_mut(&dep) {
            ds.dependents.shift_remove(&id);
        }
    }
}

fn eq_never(_: &ErasedValue, _: &ErasedValue) -> bool {
    false
}

/// Guard marking a cell as computing, for cycle detection. Unwinds cleanly
/// if the read function panics.
struct ComputeGuard<'a> {
    store: &'a Store,
    id: CellId,
}

impl<'a> ComputeGuard<'a> {
    fn enter(store: &'a Store, id: CellId) -> Self {
        store.inner.state.lock().computing.push(id);
        Self { store, id }
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        let popped = self.store.inner.state.lock().computing.pop();
        debug_assert_eq!(popped, Some(self.id), "compute stack out of order");
    }
}

/// Guard clearing the flushing flag even if a listener panics.
struct FlushGuard<'a> {
    store: &'a Store,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.store.inner.state.lock().flushing = false;
    }
}

// ----------------------------------------------------------------------------
// Contexts
// ----------------------------------------------------------------------------

/// Tracking context handed to read functions.
///
/// Every dependency resolved through [`get`](ReadCtx::get) is recorded as an
/// edge of the computing cell for this run.
pub struct ReadCtx {
    store: Store,
    id: CellId,
}

impl ReadCtx {
    /// Resolve a dependency and record the edge.
    ///
    /// Reading the computing cell itself returns its current (or initial)
    /// value without creating an edge - a cell is never its own dependency.
    pub fn get<U: Value, B>(&mut self, cell: &Cell<U, B>) -> U {
        let dep = cell.core();
        if dep.id == self.id {
            return self.own_value();
        }
        let value = self.store.read_erased(dep);
        {
            let mut st = self.store.inner.state.lock();
            if let Some(cs) = st.cells.get_mut(&self.id) {
                cs.deps.insert(dep.id, value.clone());
            }
            if let Some(ds) = st.cells.get_mut(&dep.id) {
                ds.dependents.insert(self.id);
            }
        }
        trace!(cell = %self.id, dep = %dep.id, "dependency recorded");
        value
            .downcast_ref::<U>()
            .expect("stored value matches the cell's value type")
            .clone()
    }

    /// ID of the cell being computed.
    pub fn cell_id(&self) -> CellId {
        self.id
    }

    pub(crate) fn install_future(
        &self,
        fut: BoxFuture<'static, Result<ErasedValue, AsyncError>>,
    ) -> Arc<AsyncSlot> {
        self.store.install_future(self.id, fut)
    }

    fn own_value<U: Value>(&self) -> U {
        let (current, core) = {
            let st = self.store.inner.state.lock();
            (
                st.cells.get(&self.id).and_then(|cs| cs.value.clone()),
                st.registry.get(&self.id).and_then(Weak::upgrade),
            )
        };
        let value = current
            .or_else(|| core.and_then(|c| c.init.clone()))
            .unwrap_or_else(|| panic!("{} read itself before holding a value", self.id));
        value
            .downcast_ref::<U>()
            .expect("stored value matches the cell's value type")
            .clone()
    }
}

/// Context handed to write functions.
pub struct WriteCtx {
    store: Store,
    id: CellId,
}

impl WriteCtx {
    /// Read a cell without dependency tracking (writes have no dependencies).
    pub fn get<U: Value, B>(&self, cell: &Cell<U, B>) -> U {
        self.store.read(cell)
    }

    /// Write another cell, composing write functions. The flush happens once
    /// the outermost write returns. Writing the cell currently being written
    /// commits the argument as its value directly (see
    /// [`commit`](WriteCtx::commit)).
    pub fn set<U: Value, B: Send + 'static>(
        &mut self,
        cell: &Cell<U, B>,
        arg: B,
    ) -> Result<(), StoreError> {
        if cell.core().id == self.id {
            let boxed: Box<dyn Any> = Box::new(arg);
            let value = boxed
                .downcast::<U>()
                .map_err(|_| StoreError::TypeMismatch(self.id))?;
            self.store.self_set_erased(self.id, Arc::new(*value));
            return Ok(());
        }
        self.store.write_inner(cell, arg)
    }

    /// Current (or initial) value of the cell being written.
    pub fn current<U: Value>(&self) -> Result<U, StoreError> {
        let (current, core) = {
            let st = self.store.inner.state.lock();
            (
                st.cells.get(&self.id).and_then(|cs| cs.value.clone()),
                st.registry.get(&self.id).and_then(Weak::upgrade),
            )
        };
        let value = current
            .or_else(|| core.and_then(|c| c.init.clone()))
            .ok_or(StoreError::Uninitialized(self.id))?;
        value
            .downcast_ref::<U>()
            .cloned()
            .ok_or(StoreError::TypeMismatch(self.id))
    }

    /// Commit a value directly to the cell being written.
    ///
    /// This severs the cell's reactive link to its former dependencies: the
    /// committed value persists even if the cells its read function consulted
    /// change later. This is how writable derived cells terminate.
    pub fn commit<U: Value>(&mut self, value: U) -> Result<(), StoreError> {
        let core = {
            let st = self.store.inner.state.lock();
            st.registry.get(&self.id).and_then(Weak::upgrade)
        };
        let Some(core) = core else {
            return Err(StoreError::TypeMismatch(self.id));
        };
        if std::any::TypeId::of::<U>() != core.value_type {
            return Err(StoreError::TypeMismatch(self.id));
        }
        self.store.self_set_erased(self.id, Arc::new(value));
        Ok(())
    }

    /// ID of the cell being written.
    pub fn cell_id(&self) -> CellId {
        self.id
    }
}

/// Listener registration; unsubscribes when dropped.
pub struct Subscription {
    store: Weak<StoreInner>,
    cell: CellId,
    listener: ListenerId,
}

impl Subscription {
    /// Remove the listener now. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            let mut st = inner.state.lock();
            if let Some(cs) = st.cells.get_mut(&self.cell) {
                cs.listeners.retain(|(id, _)| *id != self.listener);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn read_returns_initial_value() {
        let store = Store::new();
        let count = Cell::new(41);
        assert_eq!(store.read(&count), 41);
    }

    #[test]
    fn write_replaces_value() {
        let store = Store::new();
        let count = Cell::new(0);

        store.write(&count, 5).unwrap();
        assert_eq!(store.read(&count), 5);

        store.update(&count, |n| n + 1).unwrap();
        assert_eq!(store.read(&count), 6);
    }

    #[test]
    fn derived_cells_are_read_only() {
        let store = Store::new();
        let base = Cell::new(1);
        let doubled = {
            let base = base.clone();
            Cell::derived(move |ctx| ctx.get(&base) * 2)
        };

        assert_eq!(store.read(&doubled), 2);
        assert_eq!(
            store.write(&doubled, 10),
            Err(StoreError::ReadOnly(doubled.id()))
        );
    }

    #[test]
    fn derived_read_runs_once_while_fresh() {
        let store = Store::new();
        let base = Cell::new(1);
        let computed = Arc::new(AtomicI32::new(0));
        let derived = {
            let base = base.clone();
            let computed = computed.clone();
            Cell::derived(move |ctx| {
                computed.fetch_add(1, Ordering::SeqCst);
                ctx.get(&base) + 1
            })
        };

        assert_eq!(store.read(&derived), 2);
        assert_eq!(store.read(&derived), 2);
        assert_eq!(store.read(&derived), 2);
        assert_eq!(computed.load(Ordering::SeqCst), 1);

        store.write(&base, 10).unwrap();
        assert_eq!(store.read(&derived), 11);
        // The flush already recomputed; this read hit the cache.
        assert_eq!(computed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_fires_once_per_change() {
        let store = Store::new();
        let count = Cell::new(0);
        let calls = Arc::new(AtomicI32::new(0));
        let sub = {
            let calls = calls.clone();
            store.subscribe(&count, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        store.write(&count, 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Redundant write: no notification.
        store.write(&count, 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.write(&count, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(sub);
        store.write(&count, 3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dynamic_dependencies_are_rebuilt() {
        let store = Store::new();
        let flag = Cell::new(true);
        let left = Cell::new("left".to_string());
        let right = Cell::new("right".to_string());
        let computed = Arc::new(AtomicI32::new(0));
        let picked = {
            let (flag, left, right) = (flag.clone(), left.clone(), right.clone());
            let computed = computed.clone();
            Cell::derived(move |ctx| {
                computed.fetch_add(1, Ordering::SeqCst);
                if ctx.get(&flag) {
                    ctx.get(&left)
                } else {
                    ctx.get(&right)
                }
            })
        };

        assert_eq!(store.read(&picked), "left");
        assert_eq!(computed.load(Ordering::SeqCst), 1);

        // `right` is not currently a dependency; writing it must not
        // recompute.
        store.write(&right, "other".to_string()).unwrap();
        assert_eq!(store.read(&picked), "left");
        assert_eq!(computed.load(Ordering::SeqCst), 1);

        store.write(&flag, false).unwrap();
        assert_eq!(store.read(&picked), "other");

        // Now `left` is no longer a dependency.
        let before = computed.load(Ordering::SeqCst);
        store.write(&left, "ignored".to_string()).unwrap();
        assert_eq!(computed.load(Ordering::SeqCst), before);
    }

    #[test]
    fn self_set_severs_dependencies() {
        let store = Store::new();
        let base = Cell::new(1);
        let mirror: Cell<i32> = {
            let base = base.clone();
            Cell::writable(
                move |ctx| ctx.get(&base),
                move |ctx, value: i32| ctx.commit(value),
            )
        };

        assert_eq!(store.read(&mirror), 1);

        store.write(&mirror, 42).unwrap();
        assert_eq!(store.read(&mirror), 42);

        // The manual override persists even when the former dependency moves.
        store.write(&base, 99).unwrap();
        assert_eq!(store.read(&mirror), 42);
    }

    #[test]
    fn writable_cell_fans_out_to_backing_cells() {
        let store = Store::new();
        let celsius = Cell::new(0.0_f64);
        let fahrenheit: Cell<f64> = {
            let celsius = celsius.clone();
            let read_c = celsius.clone();
            Cell::writable(
                move |ctx| ctx.get(&read_c) * 9.0 / 5.0 + 32.0,
                move |ctx, f: f64| ctx.set(&celsius, (f - 32.0) * 5.0 / 9.0),
            )
        };

        assert_eq!(store.read(&fahrenheit), 32.0);

        store.write(&fahrenheit, 212.0).unwrap();
        assert_eq!(store.read(&celsius), 100.0);
        assert_eq!(store.read(&fahrenheit), 212.0);
    }

    #[test]
    fn reentrant_listener_writes_propagate() {
        let store = Store::new();
        let a = Cell::new(0);
        let b = Cell::new(0);
        let b_seen = Arc::new(AtomicI32::new(-1));

        // Writing `a` makes its listener write `b`.
        let _sub_a = {
            let inner = store.clone();
            let a_in = a.clone();
            let b_in = b.clone();
            store.subscribe(&a, move || {
                let v = inner.read(&a_in);
                inner.write(&b_in, v * 10).unwrap();
            })
        };
        let _sub_b = {
            let inner = store.clone();
            let b_in = b.clone();
            let b_seen = b_seen.clone();
            store.subscribe(&b, move || {
                b_seen.store(inner.read(&b_in), Ordering::SeqCst);
            })
        };

        store.write(&a, 3).unwrap();
        assert_eq!(store.read(&b), 30);
        assert_eq!(b_seen.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn failed_write_notifies_nothing() {
        let store = Store::new();
        let base = Cell::new(0);
        let guarded: Cell<i32> = {
            let base = base.clone();
            let read_base = base.clone();
            Cell::writable(
                move |ctx| ctx.get(&read_base),
                move |ctx, value: i32| {
                    ctx.set(&base, value)?;
                    Err(StoreError::TypeMismatch(ctx.cell_id()))
                },
            )
        };
        let calls = Arc::new(AtomicI32::new(0));
        let _sub = {
            let calls = calls.clone();
            store.subscribe(&base, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(store.write(&guarded, 7).is_err());
        // The inner set committed, but the failed write suppressed its
        // notification batch.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "dependency cycle")]
    fn dependency_cycles_panic() {
        let store = Store::new();
        let holder: Arc<Mutex<Option<Cell<i32>>>> = Arc::new(Mutex::new(None));
        let a: Cell<i32> = {
            let holder = holder.clone();
            Cell::derived(move |ctx| {
                let back = holder.lock().clone().expect("cell installed");
                ctx.get(&back)
            })
        };
        let b: Cell<i32> = {
            let a = a.clone();
            Cell::derived(move |ctx| ctx.get(&a))
        };
        *holder.lock() = Some(b);
        store.read(&a);
    }

    #[test]
    fn clear_resets_state() {
        let store = Store::new();
        let count = Cell::new(0);
        store.write(&count, 5).unwrap();
        assert_eq!(store.read(&count), 5);

        store.clear();
        // Back to the initial value; the cell re-registers on read.
        assert_eq!(store.read(&count), 0);
    }

    #[test]
    fn collect_prunes_dropped_cells() {
        let store = Store::new();
        let keep = Cell::new(1);
        store.read(&keep);
        {
            let transient = Cell::new(2);
            store.read(&transient);
            assert_eq!(store.collect(), 0);
        }
        assert_eq!(store.collect(), 1);
        // The surviving cell is untouched.
        assert_eq!(store.read(&keep), 1);
    }

    #[test]
    fn stores_are_independent() {
        let store_a = Store::new();
        let store_b = Store::new();
        let count = Cell::new(0);

        store_a.write(&count, 1).unwrap();
        assert_eq!(store_a.read(&count), 1);
        assert_eq!(store_b.read(&count), 0);
    }
}
