//! Forced recomputation.
//!
//! A refresh cell wraps a read function together with a hidden counter cell
//! that the read depends on. Writing the refresh cell (with no argument)
//! bumps the counter, which invalidates the snapshot and forces the read to
//! rerun even when none of its real dependencies changed - the standard way
//! to re-trigger a computation whose inputs live outside the graph.

use crate::store::{Cell, ReadCtx, Value};

/// A derived cell that recomputes on demand: `store.write(&cell, ())`.
pub fn with_refresh<T: Value>(
    read: impl Fn(&mut ReadCtx) -> T + Send + Sync + 'static,
) -> Cell<T, ()> {
    let tick = Cell::new(0_u64).with_label("refresh.tick");
    let tick_dep = tick.clone();
    Cell::writable(
        move |ctx| {
            let _ = ctx.get(&tick_dep);
            read(ctx)
        },
        move |ctx, ()| {
            let n = ctx.get(&tick);
            ctx.set(&tick, n + 1)
        },
    )
}

/// [`with_refresh`], but the computation is withheld entirely until the
/// first explicit refresh: the cell reads `None` before that.
pub fn with_lazy_refresh<T: Value>(
    read: impl Fn(&mut ReadCtx) -> T + Send + Sync + 'static,
) -> Cell<Option<T>, ()> {
    let tick = Cell::new(0_u64).with_label("refresh.tick");
    let tick_dep = tick.clone();
    Cell::writable(
        move |ctx| {
            if ctx.get(&tick_dep) == 0 {
                None
            } else {
                Some(read(ctx))
            }
        },
        move |ctx, ()| {
            let n = ctx.get(&tick);
            ctx.set(&tick, n + 1)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn refresh_forces_recomputation() {
        let store = Store::new();
        let runs = Arc::new(AtomicI32::new(0));
        let sampled = {
            let runs = runs.clone();
            with_refresh(move |_| runs.fetch_add(1, Ordering::SeqCst))
        };

        assert_eq!(store.read(&sampled), 0);
        assert_eq!(store.read(&sampled), 0);

        store.write(&sampled, ()).unwrap();
        assert_eq!(store.read(&sampled), 1);

        store.write(&sampled, ()).unwrap();
        assert_eq!(store.read(&sampled), 2);
    }

    #[test]
    fn refresh_still_tracks_real_dependencies() {
        let store = Store::new();
        let base = Cell::new(10);
        let doubled = {
            let base = base.clone();
            with_refresh(move |ctx| ctx.get(&base) * 2)
        };

        assert_eq!(store.read(&doubled), 20);

        store.write(&base, 21).unwrap();
        assert_eq!(store.read(&doubled), 42);
    }

    #[test]
    fn lazy_refresh_withholds_until_first_bump() {
        let store = Store::new();
        let runs = Arc::new(AtomicI32::new(0));
        let sampled = {
            let runs = runs.clone();
            with_lazy_refresh(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                "ready"
            })
        };

        assert_eq!(store.read(&sampled), None);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        store.write(&sampled, ()).unwrap();
        assert_eq!(store.read(&sampled), Some("ready"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
