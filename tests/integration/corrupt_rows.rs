#![allow(missing_docs)]

use std::path::PathBuf;

use quarry::logging::init_logging;
use quarry::query::QueryPhase;
use quarry::{SchemaKind, Store};
use rusqlite::Connection;
use tempfile::TempDir;

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("corrupt.db");
    let conn = Connection::open(&path).expect("open fixture");
    conn.execute_batch(
        "CREATE TABLE semif (cutout_id TEXT, image_id TEXT, image_path TEXT, state TEXT);
         INSERT INTO semif VALUES ('c01', 'img-1', 'images/1.jpg', 'NC');
         INSERT INTO semif VALUES (NULL, 'img-1', 'images/2.jpg', 'NC');
         INSERT INTO semif VALUES ('c03', 'img-2', x'0102', 'NC');
         INSERT INTO semif VALUES ('c04', 'img-2', CAST(x'ff' AS TEXT), 'NC');
         INSERT INTO semif VALUES ('c05', 'img-3', 'images/5.jpg', 'TX');
         INSERT INTO semif VALUES ('', 'img-3', 'images/6.jpg', 'TX');",
    )
    .expect("seed fixture");
    (dir, path)
}

#[test]
fn bad_rows_are_skipped_and_counted() {
    let _ = init_logging("quarry=debug");
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();

    let mut prepared = store.builder().execute().unwrap();
    let ids: Vec<String> = prepared
        .records()
        .unwrap()
        .map(|r| r.unwrap().id.to_string())
        .collect();
    assert_eq!(ids, vec!["c01", "c05"]);

    let stats = prepared.stats();
    assert_eq!(stats.rows_scanned, 6);
    assert_eq!(stats.rows_returned, 2);
    assert_eq!(stats.rows_invalid, 4);
    assert_eq!(store.phase(), QueryPhase::Done);
}

#[test]
fn count_includes_rows_that_fail_normalization() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_eq!(store.filter([("state", "NC")]).count().unwrap(), 4);
    assert_eq!(store.filter([("state", "NC")]).all().unwrap().len(), 1);
}

#[test]
fn lookups_never_return_invalid_rows() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert!(store.get("c03").unwrap().is_none());
    assert!(store.get("c04").unwrap().is_none());
    assert!(store.get("c01").unwrap().is_some());

    let same_image = store.get_by_image_id("img-2").unwrap();
    assert!(same_image.is_empty());
}

#[test]
fn rerunning_a_prepared_query_resets_counters() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let mut prepared = store.filter([("state", "TX")]).execute().unwrap();
    assert_eq!(prepared.records().unwrap().count(), 1);
    assert_eq!(prepared.records().unwrap().count(), 1);
    let stats = prepared.stats();
    assert_eq!((stats.rows_scanned, stats.rows_invalid), (2, 1));
}
