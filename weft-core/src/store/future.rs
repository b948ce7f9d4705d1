//! Continuable Async Values
//!
//! An [`Async<T>`] is the committed value of an async cell: a stable,
//! cheap-clone handle around a settlement slot. The handle compares equal to
//! itself only (pointer identity), which is what makes *continuation*
//! invisible to the store's change detection: redirecting a still-pending
//! handle to a newer future does not change the cell's value, so nothing
//! downstream recomputes until the slot actually settles.
//!
//! # Continuation
//!
//! A slot tracks the epoch of the future it currently represents. When the
//! owning cell recomputes while the slot is pending, the engine bumps the
//! epoch and aborts the superseded driver task (dropping its future - the
//! Rust rendering of an abort signal). A stale task that settles anyway is
//! ignored: only the current epoch may settle the slot. Anything already
//! awaiting the handle therefore observes only the newest settlement.
//!
//! A settled slot is never reused; the engine installs a fresh handle for
//! the next computation.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::cell::{ErasedValue, Value};

/// Failure of an async value to settle.
///
/// Domain-level failure belongs in the value type itself (`T = Result<V, E>`);
/// this error is reserved for the engine tearing the computation down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AsyncError {
    /// The store was cleared or dropped before the value settled.
    #[error("async value severed before settling")]
    Severed,
}

/// Settlement state of an [`Async`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    /// No settlement yet; the current-epoch future is still running.
    Pending,
    /// Settled with a value.
    Ready,
    /// Settled with [`AsyncError::Severed`].
    Severed,
}

struct SlotState {
    /// Epoch of the future this slot currently represents.
    epoch: u64,
    /// Driver task for the current epoch, if still running.
    task: Option<JoinHandle<()>>,
    /// Final settlement; written at most once.
    result: Option<Result<ErasedValue, AsyncError>>,
}

/// Shared settlement slot behind [`Async`] handles.
pub(crate) struct AsyncSlot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl AsyncSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                epoch: 0,
                task: None,
                result: None,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.lock().result.is_none()
    }

    pub(crate) fn current_epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Redirect the slot to a newer future: abort the superseded driver and
    /// return the new epoch the replacement must settle under.
    pub(crate) fn supersede(&self) -> u64 {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.epoch += 1;
        state.epoch
    }

    /// Record the driver task for `epoch`. If the slot moved on (or settled)
    /// between spawn and attach, the task is aborted instead.
    pub(crate) fn attach_task(&self, epoch: u64, task: JoinHandle<()>) {
        let mut state = self.state.lock();
        if state.epoch == epoch && state.result.is_none() {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Settle the slot from `epoch`. Returns false (and changes nothing) for
    /// a stale epoch or an already-settled slot.
    pub(crate) fn settle(&self, epoch: u64, result: Result<ErasedValue, AsyncError>) -> bool {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.result.is_some() {
                return false;
            }
            state.result = Some(result);
            state.task = None;
        }
        self.notify.notify_waiters();
        true
    }

    /// Force-settle a pending slot with [`AsyncError::Severed`], aborting the
    /// in-flight driver. Used on store clear/teardown so awaiters never hang.
    pub(crate) fn sever(&self) {
        {
            let mut state = self.state.lock();
            if state.result.is_some() {
                return;
            }
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.result = Some(Err(AsyncError::Severed));
        }
        self.notify.notify_waiters();
    }

    fn result(&self) -> Option<Result<ErasedValue, AsyncError>> {
        self.state.lock().result.clone()
    }
}

/// A continuable asynchronous value.
///
/// Obtained by reading an async cell. The handle stays referentially stable
/// while the underlying computation is superseded by newer ones; awaiting it
/// yields the value of whichever computation finally settles.
pub struct Async<T> {
    slot: Arc<AsyncSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Async<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Async<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Value> Async<T> {
    pub(crate) fn from_slot(slot: Arc<AsyncSlot>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Current settlement state.
    pub fn status(&self) -> AsyncStatus {
        match self.slot.result() {
            None => AsyncStatus::Pending,
            Some(Ok(_)) => AsyncStatus::Ready,
            Some(Err(AsyncError::Severed)) => AsyncStatus::Severed,
        }
    }

    /// Non-blocking peek at the settled value.
    pub fn try_get(&self) -> Option<Result<T, AsyncError>> {
        self.slot.result().map(|r| r.map(|v| downcast_value(&v)))
    }

    /// Wait for settlement.
    pub async fn wait(&self) -> Result<T, AsyncError> {
        loop {
            let notified = self.slot.notify.notified();
            if let Some(result) = self.slot.result() {
                return result.map(|v| downcast_value(&v));
            }
            notified.await;
        }
    }
}

fn downcast_value<T: Value>(value: &ErasedValue) -> T {
    value
        .downcast_ref::<T>()
        .expect("settled value matches the handle's value type")
        .clone()
}

impl<T> Debug for Async<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.slot.result() {
            None => "pending",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "severed",
        };
        f.debug_struct("Async").field("status", &status).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn value(n: i32) -> ErasedValue {
        Arc::new(n)
    }

    #[test]
    fn settle_is_write_once() {
        let slot = AsyncSlot::new();
        assert!(slot.is_pending());

        assert!(slot.settle(0, Ok(value(1))));
        assert!(!slot.is_pending());

        // A second settlement is rejected.
        assert!(!slot.settle(0, Ok(value(2))));

        let handle: Async<i32> = Async::from_slot(Arc::new(slot));
        assert_eq!(handle.try_get(), Some(Ok(1)));
    }

    #[test]
    fn stale_epoch_cannot_settle() {
        let slot = AsyncSlot::new();
        let new_epoch = slot.supersede();
        assert_eq!(new_epoch, 1);

        // Epoch 0 was superseded; its settlement is ignored.
        assert!(!slot.settle(0, Ok(value(1))));
        assert!(slot.is_pending());

        assert!(slot.settle(1, Ok(value(2))));
        let handle: Async<i32> = Async::from_slot(Arc::new(slot));
        assert_eq!(handle.try_get(), Some(Ok(2)));
    }

    #[test]
    fn sever_settles_with_error() {
        let slot = Arc::new(AsyncSlot::new());
        slot.sever();

        let handle: Async<i32> = Async::from_slot(slot);
        assert_eq!(handle.status(), AsyncStatus::Severed);
        assert_eq!(handle.try_get(), Some(Err(AsyncError::Severed)));
    }

    #[test]
    fn handles_compare_by_slot_identity() {
        let slot = Arc::new(AsyncSlot::new());
        let a: Async<i32> = Async::from_slot(Arc::clone(&slot));
        let b = a.clone();
        let c: Async<i32> = Async::from_slot(Arc::new(AsyncSlot::new()));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn wait_wakes_on_settlement() {
        let slot = Arc::new(AsyncSlot::new());
        let handle: Async<i32> = Async::from_slot(Arc::clone(&slot));

        let waiter = tokio::spawn(async move { handle.wait().await });
        tokio::task::yield_now().await;

        slot.settle(0, Ok(value(42)));
        let settled = waiter.await.expect("waiter task");
        assert_eq!(settled, Ok(42));
    }
}
