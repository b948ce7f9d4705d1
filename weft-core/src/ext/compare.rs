//! Compare-gated writes.

use crate::store::{Cell, Value};

/// A value cell whose write step commits `gate(&old, &new)` instead of the
/// incoming value, letting the caller veto or dampen updates. Returning the
/// old value from the gate makes the write a no-op (no notification).
///
/// ```rust
/// use weft_core::ext::with_compare;
/// use weft_core::store::Store;
///
/// let store = Store::new();
/// // Ignore changes of five or less.
/// let level = with_compare(0, |prev: &i32, next: &i32| {
///     if (prev - next).abs() <= 5 { *prev } else { *next }
/// });
///
/// store.write(&level, 3).unwrap();
/// assert_eq!(store.read(&level), 0);
///
/// store.write(&level, 9).unwrap();
/// assert_eq!(store.read(&level), 9);
/// ```
pub fn with_compare<T: Value>(
    init: T,
    gate: impl Fn(&T, &T) -> T + Send + Sync + 'static,
) -> Cell<T> {
    Cell::with_write(init, move |ctx, next: T| {
        let prev = ctx.current::<T>()?;
        ctx.commit(gate(&prev, &next))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn gate_can_keep_the_old_value() {
        let store = Store::new();
        let level = with_compare(0, |prev: &i32, next: &i32| {
            if (prev - next).abs() <= 5 {
                *prev
            } else {
                *next
            }
        });

        store.write(&level, 3).unwrap();
        assert_eq!(store.read(&level), 0);

        store.write(&level, 9).unwrap();
        assert_eq!(store.read(&level), 9);
    }

    #[test]
    fn vetoed_writes_never_notify() {
        let store = Store::new();
        let level = with_compare(0, |prev: &i32, next: &i32| {
            if *next < 0 {
                *prev
            } else {
                *next
            }
        });
        let calls = Arc::new(AtomicI32::new(0));
        let _sub = {
            let calls = calls.clone();
            store.subscribe(&level, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        store.write(&level, -4).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.write(&level, 8).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
