use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use soledb::Connection;

fn insert_rows(c: &mut Criterion) {
    c.bench_function("insert_100_rows_memory", |b| {
        b.iter_batched(
            || {
                let mut conn = Connection::open_memory().unwrap();
                conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
                conn
            },
            |mut conn| {
                conn.execute("BEGIN").unwrap();
                for i in 0..100 {
                    conn.execute(&format!("INSERT INTO t VALUES ({i}, 'row-{i}')"))
                        .unwrap();
                }
                conn.execute("COMMIT").unwrap();
                conn
            },
            BatchSize::SmallInput,
        )
    });
}

fn scan_rows(c: &mut Criterion) {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
    conn.execute("BEGIN").unwrap();
    for i in 0..1000 {
        conn.execute(&format!("INSERT INTO t VALUES ({i}, 'row-{i}')"))
            .unwrap();
    }
    conn.execute("COMMIT").unwrap();

    c.bench_function("scan_1000_rows_filtered", |b| {
        b.iter(|| {
            let rows = conn
                .query("SELECT name FROM t WHERE id >= 500")
                .unwrap()
                .collect_all()
                .unwrap();
            assert_eq!(rows.len(), 500);
        })
    });
}

criterion_group!(benches, insert_rows, scan_rows);
criterion_main!(benches);
