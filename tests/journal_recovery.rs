//! Hot rollback-journal recovery: a journal left behind by an interrupted
//! commit is replayed on the next open, restoring the pre-transaction
//! state.

use soledb::storage::{journal, PageIo, PageStore, RollbackJournal};
use soledb::{Connection, Value};
use tempfile::tempdir;

fn names(conn: &mut Connection) -> Vec<String> {
    conn.query("SELECT name FROM t")
        .unwrap()
        .collect_all()
        .unwrap()
        .iter()
        .map(|row| match row.get(0) {
            Value::Text(s) => s.clone(),
            other => panic!("expected text, got {other:?}"),
        })
        .collect()
}

#[test]
fn interrupted_commit_is_rolled_back_on_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.db");

    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'committed')").unwrap();
    }

    // Simulate a crash mid-commit: journal valid pre-images of every page,
    // then scribble over the main file the way a half-finished page flush
    // would.
    {
        let mut store = PageStore::open(&path).unwrap();
        let page_count = store.page_count();

        let mut journal =
            RollbackJournal::create(&path, store.page_size(), page_count).unwrap();
        for page_no in 0..page_count {
            let image = store.read_page(page_no).unwrap();
            journal.append_page(page_no, &image).unwrap();
        }
        journal.sync().unwrap();
        // The journal handle is dropped without delete(): it stays hot.

        let garbage = vec![0xCC; store.page_size()];
        for page_no in 1..page_count {
            store.write_page(page_no, &garbage).unwrap();
        }
        store.extend().unwrap();
        store.sync().unwrap();
        drop(journal);
    }

    assert!(journal::is_hot(&path));

    let mut conn = Connection::open(&path).unwrap();
    assert_eq!(names(&mut conn), vec!["committed".to_string()]);
    assert!(!journal::is_hot(&path));
}

#[test]
fn stale_empty_journal_is_ignored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stale.db");

    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
        conn.execute("INSERT INTO t VALUES (1, 'kept')").unwrap();
    }

    // A zero-length journal (crash before the header reached disk) holds
    // nothing to replay.
    std::fs::write(journal::journal_path(&path), b"").unwrap();

    let mut conn = Connection::open(&path).unwrap();
    assert_eq!(names(&mut conn), vec!["kept".to_string()]);
}

#[test]
fn aborted_transaction_file_growth_is_undone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("growth.db");

    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT)").unwrap();
    }

    let original_size = std::fs::metadata(&path).unwrap().len();

    {
        let mut store = PageStore::open(&path).unwrap();
        let page_count = store.page_count();

        let mut journal =
            RollbackJournal::create(&path, store.page_size(), page_count).unwrap();
        let image = store.read_page(0).unwrap();
        journal.append_page(0, &image).unwrap();
        journal.sync().unwrap();

        // Interrupted transaction grew the file before dying.
        store.grow(page_count + 8).unwrap();
        store.sync().unwrap();
        drop(journal);
    }

    let conn = Connection::open(&path).unwrap();
    drop(conn);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), original_size);
}
