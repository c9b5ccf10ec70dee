#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use quarry::query::{SampleSpec, SampleStrategy};
use quarry::{QuarryError, QuerySpec, Record, SchemaKind, Store};
use rusqlite::{params, Connection};
use tempfile::TempDir;

// 18 rows; rowid follows insertion order, ids are `c01`..`c18`.
const GROUPS: [(&str, usize); 3] = [("barley", 5), ("hairy vetch", 3), ("wheat", 10)];

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("agir.db");
    seed_groups(&path).expect("seed groups");
    (dir, path)
}

fn seed_groups(path: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE semif (
            cutout_id TEXT,
            image_path TEXT,
            category_common_name TEXT,
            state TEXT,
            estimated_bbox_area_cm2 REAL
        );",
    )?;
    let mut n = 0;
    for (category, size) in GROUPS {
        for i in 0..size {
            n += 1;
            let state = if i % 2 == 0 { "NC" } else { "TX" };
            conn.execute(
                "INSERT INTO semif VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    format!("c{n:02}"),
                    format!("images/{n}.jpg"),
                    category,
                    state,
                    n as f64 * 1.5
                ],
            )?;
        }
    }
    Ok(())
}

fn ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.id.to_string()).collect()
}

fn per_category(records: &[Record]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let category = record
            .extras
            .text("category_common_name")
            .unwrap_or_default()
            .to_owned();
        *counts.entry(category).or_insert(0) += 1;
    }
    counts
}

#[test]
fn stratified_caps_every_group() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store
        .sample_stratified(["category_common_name"], 4, None)
        .all()
        .unwrap();
    assert_eq!(records.len(), 11);
    let counts = per_category(&records);
    assert_eq!(counts["barley"], 4);
    assert_eq!(counts["hairy vetch"], 3);
    assert_eq!(counts["wheat"], 4);
}

#[test]
fn stratified_caps_before_paging() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let stratified = || store.sample_stratified(["category_common_name"], 4, Some(5));
    assert_eq!(stratified().limit(5).all().unwrap().len(), 5);
    assert_eq!(stratified().offset(10).all().unwrap().len(), 1);
    assert_eq!(stratified().limit(3).offset(9).all().unwrap().len(), 2);
}

#[test]
fn stratified_applies_filters_before_grouping() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store
        .filter([("state", "NC")])
        .sample_stratified(["category_common_name"], 2, Some(11))
        .sort("estimated_bbox_area_cm2", "desc")
        .all()
        .unwrap();
    // NC rows per group: barley 3, hairy vetch 2, wheat 5
    assert_eq!(records.len(), 6);
    assert!(records
        .iter()
        .all(|r| r.extras.text("state") == Some("NC")));
    let areas: Vec<f64> = records
        .iter()
        .filter_map(|r| match r.extras.get("estimated_bbox_area_cm2") {
            Some(quarry::query::Value::Float(a)) => Some(*a),
            _ => None,
        })
        .collect();
    assert!(areas.windows(2).all(|w| w[0] >= w[1]));

    let again = store
        .filter([("state", "NC")])
        .sample_stratified(["category_common_name"], 2, Some(11))
        .sort("estimated_bbox_area_cm2", "desc")
        .all()
        .unwrap();
    assert_eq!(ids(&records), ids(&again));
}

#[test]
fn stratified_sort_column_need_not_be_projected() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store
        .select(["category_common_name"])
        .sample_stratified(["category_common_name"], 1, Some(3))
        .sort("estimated_bbox_area_cm2", "asc")
        .limit(2)
        .all()
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].extras.columns(), ["cutout_id", "category_common_name"]);
}

#[test]
fn seeded_sample_is_reproducible() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let first = store.sample_seeded(3, Some(7)).all().unwrap();
    let second = store.sample_seeded(3, Some(7)).all().unwrap();
    assert_eq!(ids(&first), vec!["c02", "c04", "c06"]);
    assert_eq!(ids(&first), ids(&second));

    let other = store.sample_seeded(3, Some(1_073_741_831)).all().unwrap();
    assert_eq!(other.len(), 3);
    assert_ne!(ids(&first), ids(&other));
}

#[test]
fn seeded_sample_size_falls_back_to_limit() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let spec = QuerySpec {
        limit: Some(5),
        sample: Some(SampleSpec {
            strategy: SampleStrategy::Seeded,
            seed: Some(7),
            ..SampleSpec::default()
        }),
        ..QuerySpec::default()
    };
    let records = store.collect(&spec).unwrap();
    assert_eq!(ids(&records), vec!["c02", "c04", "c06", "c08", "c10"]);
}

#[test]
fn random_sample_returns_distinct_matches() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let records = store
        .filter([("category_common_name", "wheat")])
        .sample_random(4)
        .all()
        .unwrap();
    assert_eq!(records.len(), 4);
    let unique: HashSet<String> = ids(&records).into_iter().collect();
    assert_eq!(unique.len(), 4);
    assert!(records
        .iter()
        .all(|r| r.extras.text("category_common_name") == Some("wheat")));

    let all = store.sample_random(100).all().unwrap();
    assert_eq!(all.len(), 18);
}

#[test]
fn invalid_samples_fail_before_reading() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let err = store.sample_random(0).all().unwrap_err();
    assert!(matches!(err, QuarryError::InvalidSampleSpec(_)));

    let err = store
        .sample_stratified(Vec::<String>::new(), 3, None)
        .all()
        .unwrap_err();
    assert_eq!(err.code(), "InvalidSampleSpec");

    let err = store
        .sample_stratified(["category_common_name"], 0, None)
        .all()
        .unwrap_err();
    assert!(err.is_compile_error());
}

#[test]
fn large_membership_lists_are_chunked() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let wanted: Vec<String> = (1..=2500).map(|n| format!("c{n:02}")).collect();
    let builder = || store.filter([("cutout_id", wanted.clone())]);
    assert_eq!(builder().count().unwrap(), 18);
    assert_eq!(builder().all().unwrap().len(), 18);

    let compiled = store.explain(&builder().to_spec().unwrap()).unwrap();
    assert_eq!(compiled.params.len(), 2500);
    assert_eq!(compiled.sql.matches(" IN (").count(), 3);
}
