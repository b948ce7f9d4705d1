//! Slice selection with change suppression.
//!
//! `select` derives a narrow view out of a wider cell. Because the store's
//! change detection is the value type's `PartialEq`, a selector alone would
//! already stop propagation when the selected slice is unchanged; the
//! `select_with` variant additionally lets the caller decide equality for
//! the slice (for example, tolerance-based comparison of floats), returning
//! the previous selection so downstream cells see no change at all.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::store::{Async, Cell, Value};

/// Derive a view `f` of `source`, suppressing propagation when the selected
/// value is `==` the previous one.
pub fn select<T, A, U>(
    source: &Cell<T, A>,
    f: impl Fn(&T) -> U + Send + Sync + 'static,
) -> Cell<U>
where
    T: Value,
    U: Value,
    A: 'static,
{
    select_with(source, f, |prev: &U, next: &U| prev == next)
}

/// [`select`] with caller-supplied slice equality.
///
/// When `eq(previous, next)` holds, the previous selection is re-committed
/// unchanged, so nothing downstream recomputes. The previous selection is
/// kept per cell, not per store; a selection cell shared across stores
/// shares its suppression state.
pub fn select_with<T, A, U>(
    source: &Cell<T, A>,
    f: impl Fn(&T) -> U + Send + Sync + 'static,
    eq: impl Fn(&U, &U) -> bool + Send + Sync + 'static,
) -> Cell<U>
where
    T: Value,
    U: Value,
    A: 'static,
{
    let source = source.clone();
    let previous: Mutex<Option<U>> = Mutex::new(None);
    Cell::derived(move |ctx| {
        let value = ctx.get(&source);
        let next = f(&value);
        let mut previous = previous.lock();
        if let Some(prev) = previous.as_ref() {
            if eq(prev, &next) {
                return prev.clone();
            }
        }
        *previous = Some(next.clone());
        next
    })
}

/// Selection through an async source: awaits the upstream handle and
/// re-selects. Severance of the upstream value propagates.
pub fn select_async<T, A, U>(
    source: &Cell<Async<T>, A>,
    f: impl Fn(&T) -> U + Send + Sync + 'static,
) -> Cell<Async<U>>
where
    T: Value,
    U: Value,
    A: 'static,
{
    let source = source.clone();
    let f = Arc::new(f);
    Cell::future_result(move |ctx| {
        let handle = ctx.get(&source);
        let f = Arc::clone(&f);
        async move {
            let value = handle.wait().await?;
            Ok(f(&value))
        }
    })
}
