use criterion::{black_box, criterion_group, criterion_main, Criterion};

use weft_core::store::{Cell, Store};

/// Fresh reads are the hot path: a cache hit plus a snapshot validation per
/// dependency.
fn bench_fresh_read(c: &mut Criterion) {
    let store = Store::new();
    let base = Cell::new(1);
    let derived = {
        let base = base.clone();
        Cell::derived(move |ctx| ctx.get(&base) + 1)
    };
    store.read(&derived);

    c.bench_function("read_fresh", |b| b.iter(|| black_box(store.read(&derived))));
}

/// A write at the root of a ten-deep chain: commit, propagate, notify.
fn bench_write_chain(c: &mut Criterion) {
    let store = Store::new();
    let base = Cell::new(0);
    let mut chain: Cell<i32> = {
        let base = base.clone();
        Cell::derived(move |ctx| ctx.get(&base) + 1)
    };
    for _ in 0..9 {
        let prev = chain.clone();
        chain = Cell::derived(move |ctx| ctx.get(&prev) + 1);
    }
    store.read(&chain);

    c.bench_function("write_chain_10", |b| {
        let mut n = 0;
        b.iter(|| {
            n += 1;
            store.write(&base, n).expect("write");
            black_box(store.read(&chain))
        })
    });
}

criterion_group!(benches, bench_fresh_read, bench_write_chain);
criterion_main!(benches);
