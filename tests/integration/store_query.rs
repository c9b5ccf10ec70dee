#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use quarry::query::{QueryPhase, Value};
use quarry::{QuarryError, QuerySpec, SchemaKind, Store, StoreConfig};
use rusqlite::{params, Connection};
use tempfile::TempDir;

const CUTOUTS: [(&str, &str, &str, &str, f64); 6] = [
    ("c01", "img-1", "barley", "NC", 2.0),
    ("c02", "img-1", "barley", "NC", 6.5),
    ("c03", "img-2", "wheat", "TX", 9.0),
    ("c04", "img-2", "wheat", "NC", 4.5),
    ("c05", "img-3", "hairy vetch", "NC", 12.0),
    ("c06", "img-3", "barley", "TX", 7.25),
];

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("agir.db");
    seed_cutouts(&path).expect("seed cutouts");
    (dir, path)
}

fn seed_cutouts(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE semif (
            cutout_id TEXT,
            image_id TEXT,
            image_path TEXT,
            mask_path TEXT,
            json_path TEXT,
            category_common_name TEXT,
            state TEXT,
            estimated_bbox_area_cm2 REAL
        );",
    )?;
    for (id, image, category, state, area) in CUTOUTS {
        conn.execute(
            "INSERT INTO semif VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                image,
                format!("images/{image}.jpg"),
                format!("masks/{id}.png"),
                "",
                category,
                state,
                area
            ],
        )?;
    }
    Ok(())
}

fn ids(records: &[quarry::Record]) -> Vec<String> {
    records.iter().map(|r| r.id.to_string()).collect()
}

#[test]
fn filters_sort_and_limit_pick_top_matches() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store
        .filter([("category_common_name", vec!["barley", "wheat"])])
        .sort("estimated_bbox_area_cm2", "desc")
        .limit(2)
        .all()
        .unwrap();
    assert_eq!(ids(&records), vec!["c03", "c06"]);
    assert_eq!(
        store
            .filter([("category_common_name", vec!["barley", "wheat"])])
            .count()
            .unwrap(),
        5
    );
    assert_eq!(records[0].image_path, Some(PathBuf::from("images/img-2.jpg")));
    assert_eq!(records[0].mask_path, Some(PathBuf::from("masks/c03.png")));
    assert_eq!(records[0].json_path, None);
}

#[test]
fn projection_keeps_identifier_first() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store.select(["image_path"]).all().unwrap();
    assert_eq!(records.len(), CUTOUTS.len());
    for record in &records {
        assert_eq!(record.extras.columns(), ["cutout_id", "image_path"]);
        assert!(record.image_path.is_some());
        assert_eq!(record.mask_path, None);
    }
}

#[test]
fn count_matches_streamed_rows() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let counted = store.filter([("state", "NC")]).count().unwrap();
    let streamed = store.filter([("state", "NC")]).all().unwrap();
    assert_eq!(counted, 4);
    assert_eq!(streamed.len() as u64, counted);

    // count ignores paging
    assert_eq!(store.filter([("state", "NC")]).limit(1).count().unwrap(), 4);
}

#[test]
fn paging_without_limit_uses_offset() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store.builder().offset(4).all().unwrap();
    assert_eq!(ids(&records), vec!["c05", "c06"]);

    let preview = store.builder().limit(5).preview(2).unwrap();
    assert_eq!(ids(&preview), vec!["c01", "c02"]);

    let first = store.filter([("state", "TX")]).first().unwrap().unwrap();
    assert_eq!(first.id, Value::from("c03"));
}

#[test]
fn lookup_by_identifier_and_image() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let record = store.get("c04").unwrap().unwrap();
    assert_eq!(record.image_id.as_deref(), Some("img-2"));
    assert!(store.get("c99").unwrap().is_none());

    let siblings = store.get_by_image_id("img-3").unwrap();
    assert_eq!(ids(&siblings), vec!["c05", "c06"]);
}

#[test]
fn field_schema_reads_records_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("field.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE records (id INTEGER, image_id TEXT, raw_image_path TEXT,
             developed_image_path TEXT, final_mask_path TEXT);
         INSERT INTO records VALUES (1, 'f-1', 'raw/1.arw', 'dev/1.jpg', NULL);
         INSERT INTO records VALUES (2, 'f-2', 'raw/2.arw', '', 'masks/2.png');",
    )
    .unwrap();
    drop(conn);

    let store = Store::open(&path, SchemaKind::Field).unwrap();
    let record = store.get(2_i64).unwrap().unwrap();
    assert_eq!(record.image_path, Some(PathBuf::from("raw/2.arw")));
    assert_eq!(record.mask_path, Some(PathBuf::from("masks/2.png")));
    let first = store.builder().first().unwrap().unwrap();
    assert_eq!(first.image_path, Some(PathBuf::from("dev/1.jpg")));

    let err = store.get_by_image_id("f-1").unwrap_err();
    assert_eq!(err.code(), "Unsupported");
}

#[test]
fn phases_follow_the_stream() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_eq!(store.phase(), QueryPhase::Idle);

    let mut prepared = store.filter([("state", "NC")]).execute().unwrap();
    assert_eq!(store.phase(), QueryPhase::Compiling);
    {
        let mut records = prepared.records().unwrap();
        assert!(records.next().is_some());
        assert_eq!(store.phase(), QueryPhase::Streaming);
        assert_eq!(records.by_ref().count(), 3);
    }
    assert_eq!(store.phase(), QueryPhase::Done);
    let stats = prepared.stats();
    assert_eq!((stats.rows_scanned, stats.rows_returned, stats.rows_invalid), (4, 4, 0));

    let err = store.where_expr("drop table semif").all().unwrap_err();
    assert_eq!(err.code(), "MalformedFilter");
    assert_eq!(store.phase(), QueryPhase::Failed);
}

#[test]
fn dropping_a_stream_early_finishes_it() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let mut prepared = store.builder().execute().unwrap();
    let first = prepared.records().unwrap().next();
    assert!(first.is_some());
    assert_eq!(store.phase(), QueryPhase::Done);
    assert_eq!(prepared.stats().rows_returned, 1);
}

#[test]
fn close_is_idempotent_and_reopens_lazily() {
    let (_dir, path) = setup_db();
    let mut store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert!(!store.is_open());
    assert_eq!(store.builder().count().unwrap(), 6);
    assert!(store.is_open());

    store.close().unwrap();
    store.close().unwrap();
    assert!(!store.is_open());
    assert_eq!(store.builder().count().unwrap(), 6);
}

#[test]
fn explain_shows_the_planned_statement() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let spec = store
        .select(["state"])
        .filter([("state", "NC")])
        .to_spec()
        .unwrap();
    let compiled = store.explain(&spec).unwrap();
    assert_eq!(
        compiled.sql,
        r#"SELECT "cutout_id", "state" FROM "semif" WHERE "state" = ? ORDER BY "cutout_id" ASC"#
    );
    assert_eq!(compiled.params, vec![Value::from("NC")]);
}

#[test]
fn opening_problems_are_reported() {
    let dir = TempDir::new().unwrap();
    let err = Store::open(dir.path().join("missing.db"), SchemaKind::Cutout).unwrap_err();
    assert!(matches!(err, QuarryError::MissingDatabase(_)));

    let (_dir, path) = setup_db();
    let store =
        Store::with_config(StoreConfig::new(&path, SchemaKind::Cutout).with_table("plants"))
            .unwrap();
    let err = store.builder().all().unwrap_err();
    assert_eq!(err.code(), "UnknownTable");

    let err = Store::with_config(StoreConfig::new(&path, SchemaKind::Cutout).with_table(""))
        .unwrap_err();
    assert_eq!(err.code(), "InvalidIdentifier");
}

#[test]
fn spec_round_trips_through_the_store() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let spec: QuerySpec = serde_json::from_str(
        r#"{"filters":{"state":"TX"},"sort":[{"column":"estimated_bbox_area_cm2","direction":"desc"}]}"#,
    )
    .unwrap();
    let records = store.collect(&spec).unwrap();
    assert_eq!(ids(&records), vec!["c03", "c06"]);
}

fn assert_no_such_column(err: QuarryError) {
    assert!(matches!(err, QuarryError::Store(_)), "{err:?}");
    assert!(err.to_string().contains("no such column"), "{err}");
}

#[test]
fn unknown_filter_column_fails() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_no_such_column(store.filter([("stat", "NC")]).all().unwrap_err());
    assert_eq!(store.phase(), QueryPhase::Failed);
    assert_no_such_column(store.where_expr("stat is null").all().unwrap_err());
    assert_no_such_column(store.filter([("stat", "NC")]).count().unwrap_err());
}

#[test]
fn unknown_sort_column_fails() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_no_such_column(store.builder().sort("stat", "desc").all().unwrap_err());
}

#[test]
fn unknown_projection_column_fails() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_no_such_column(store.select(["image_path", "stat"]).all().unwrap_err());
}

#[test]
fn unknown_stratification_column_fails() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    assert_no_such_column(
        store
            .sample_stratified(["categroy"], 2, Some(7))
            .all()
            .unwrap_err(),
    );
}
