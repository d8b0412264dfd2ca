//! Transaction semantics: autocommit, explicit transactions, rollback, and
//! transaction state errors.

use soledb::{Connection, SoleError, Value};
use tempfile::tempdir;

fn count(conn: &mut Connection, sql: &str) -> usize {
    conn.query(sql).unwrap().collect_all().unwrap().len()
}

#[test]
fn autocommit_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("auto.db");

    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        let result = conn
            .execute("INSERT INTO t VALUES (1, 'a'), (2, 'b')")
            .unwrap();
        assert_eq!(result.rows_affected(), 2);
    }

    let mut conn = Connection::open(&path).unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 2);
}

#[test]
fn explicit_commit_and_rollback() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER)").unwrap();

    conn.execute("BEGIN").unwrap();
    conn.execute("INSERT INTO t VALUES (1)").unwrap();
    conn.execute("INSERT INTO t VALUES (2)").unwrap();
    conn.execute("COMMIT").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 2);

    conn.execute("BEGIN").unwrap();
    conn.execute("DELETE FROM t").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 0);
    conn.execute("ROLLBACK").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 2);
}

#[test]
fn rollback_discards_ddl() {
    let mut conn = Connection::open_memory().unwrap();

    conn.execute("BEGIN").unwrap();
    conn.execute("CREATE TABLE ephemeral (id INTEGER)").unwrap();
    conn.execute("INSERT INTO ephemeral VALUES (1)").unwrap();
    conn.execute("ROLLBACK").unwrap();

    let err = conn.query("SELECT * FROM ephemeral").unwrap_err();
    assert!(matches!(SoleError::of(&err), Some(SoleError::Usage { .. })));
}

#[test]
fn dropped_connection_rolls_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("drop.db");

    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
        conn.execute("INSERT INTO t VALUES (1)").unwrap();

        conn.execute("BEGIN").unwrap();
        conn.execute("INSERT INTO t VALUES (2)").unwrap();
        // Dropped without COMMIT.
    }

    let mut conn = Connection::open(&path).unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 1);
}

#[test]
fn nested_begin_is_rejected() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("BEGIN").unwrap();

    let err = conn.execute("BEGIN").unwrap_err();
    assert!(matches!(SoleError::of(&err), Some(SoleError::Usage { .. })));

    // The original transaction is still usable.
    conn.execute("COMMIT").unwrap();
}

#[test]
fn commit_without_begin_is_rejected() {
    let mut conn = Connection::open_memory().unwrap();
    for sql in ["COMMIT", "ROLLBACK"] {
        let err = conn.execute(sql).unwrap_err();
        let sole = SoleError::of(&err).unwrap();
        assert!(matches!(sole, SoleError::Usage { .. }));
        assert_eq!(sole.code(), soledb::codes::MISUSE);
    }
}

#[test]
fn failed_autocommit_statement_leaves_no_trace() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();

    // Arity mismatch fails after the write transaction began.
    assert!(conn.execute("INSERT INTO t VALUES (1)").is_err());
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 0);

    // The connection is not wedged.
    conn.execute("INSERT INTO t VALUES (1, 'ok')").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 1);
}

#[test]
fn updates_and_deletes_report_row_counts() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER, v TEXT)").unwrap();
    conn.execute("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c')")
        .unwrap();

    let updated = conn
        .execute("UPDATE t SET v = 'x' WHERE id <= 2")
        .unwrap()
        .rows_affected();
    assert_eq!(updated, 2);

    let deleted = conn
        .execute("DELETE FROM t WHERE v = 'x'")
        .unwrap()
        .rows_affected();
    assert_eq!(deleted, 2);

    let rows = conn.query("SELECT v FROM t").unwrap().collect_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), &Value::Text("c".into()));
}

#[test]
fn with_transaction_commits_on_ok_and_rolls_back_on_err() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER)").unwrap();

    conn.with_transaction(|conn| {
        conn.execute("INSERT INTO t VALUES (1)")?;
        conn.execute("INSERT INTO t VALUES (2)")?;
        Ok(())
    })
    .unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 2);

    let result: eyre::Result<()> = conn.with_transaction(|conn| {
        conn.execute("DELETE FROM t")?;
        eyre::bail!("application-level failure")
    });
    assert!(result.is_err());
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 2);
}

#[test]
fn with_transaction_inside_open_transaction_is_rejected() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER)").unwrap();
    conn.execute("BEGIN").unwrap();

    let err = conn
        .with_transaction(|c| c.execute("INSERT INTO t VALUES (1)"))
        .unwrap_err();
    assert!(matches!(SoleError::of(&err), Some(SoleError::Usage { .. })));

    // The outer transaction is untouched.
    conn.execute("INSERT INTO t VALUES (2)").unwrap();
    conn.execute("COMMIT").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 1);
}

#[test]
fn cursor_sees_own_uncommitted_writes() {
    let mut conn = Connection::open_memory().unwrap();
    conn.execute("CREATE TABLE t (id INTEGER)").unwrap();

    conn.execute("BEGIN").unwrap();
    conn.execute("INSERT INTO t VALUES (10), (20)").unwrap();

    {
        let rows = conn.query("SELECT id FROM t").unwrap().collect_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get(0), &Value::Integer(20));
    }

    conn.execute("ROLLBACK").unwrap();
    assert_eq!(count(&mut conn, "SELECT * FROM t"), 0);
}
