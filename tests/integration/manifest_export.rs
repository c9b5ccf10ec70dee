#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use quarry::export::{export_to_path, write_json, ExportFormat};
use quarry::{QueryManifest, QueryRequest, SchemaKind, Store};
use rusqlite::{params, Connection};
use tempfile::TempDir;

fn setup_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("agir.db");
    let conn = Connection::open(&path).expect("open fixture");
    conn.execute_batch(
        "CREATE TABLE semif (
            cutout_id TEXT,
            image_id TEXT,
            image_path TEXT,
            mask_path TEXT,
            category_common_name TEXT,
            estimated_bbox_area_cm2 REAL
        );",
    )
    .expect("create table");
    for n in 1..=12 {
        let category = if n % 3 == 0 { "wheat" } else { "barley" };
        conn.execute(
            "INSERT INTO semif VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format!("c{n:02}"),
                format!("img-{}", n / 4),
                format!("images/{n}.jpg"),
                if n % 2 == 0 { Some(format!("masks/{n}.png")) } else { None },
                category,
                f64::from(n) * 2.0
            ],
        )
        .expect("insert row");
    }
    (dir, path)
}

fn request() -> QueryRequest {
    QueryRequest {
        filters: vec![
            "category_common_name=barley".into(),
            "estimated_bbox_area_cm2 >= 4".into(),
        ],
        projection: Some("image_path,mask_path,estimated_bbox_area_cm2".into()),
        sample: Some("seeded:n=4,seed=19".into()),
        ..QueryRequest::default()
    }
}

#[test]
fn manifest_reproduces_a_seeded_run() {
    let (dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let request = request();

    let mut manifest = QueryManifest::new(&request, store.config())
        .unwrap()
        .with_run_id("run-42");
    let mut prepared = request.apply(store.builder()).unwrap().execute().unwrap();
    let out = dir.path().join("out").join("subset.csv");
    let projection = request.projection_columns();
    let written = export_to_path(
        prepared.records().unwrap(),
        &out,
        ExportFormat::Csv,
        projection.as_deref(),
    )
    .unwrap();
    assert_eq!(written, 4);
    manifest.record_stats(&prepared.stats());
    manifest.execution.output_format = Some(ExportFormat::Csv.to_string());

    let manifest_path = dir.path().join("out").join("manifest.json");
    manifest.save(&manifest_path).unwrap();
    let loaded = QueryManifest::load(&manifest_path).unwrap();
    assert_eq!(loaded.metadata, manifest.metadata);
    assert_eq!(loaded.parameters, manifest.parameters);
    assert_eq!(loaded.execution.rows_returned, Some(4));
    assert_eq!(loaded.database.table, "semif");

    let csv_text = fs::read_to_string(&out).unwrap();
    let mut lines = csv_text.lines();
    assert_eq!(
        lines.next(),
        Some("image_path,mask_path,estimated_bbox_area_cm2,cutout_id,json_path")
    );
    assert_eq!(lines.count(), 4);

    let first: Vec<String> = store
        .collect(&request.to_spec().unwrap())
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    let replay: Vec<String> = store
        .collect(&loaded.to_spec().unwrap())
        .unwrap()
        .iter()
        .map(|r| r.id.to_string())
        .collect();
    assert_eq!(first, replay);
    assert!(loaded.summary().contains("Sampling: Seeded (4 records, seed=19)"));
}

#[test]
fn manifests_of_different_runs_diff() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let a = QueryManifest::new(&request(), store.config()).unwrap();
    let b = QueryManifest::new(
        &QueryRequest {
            sample: Some("seeded:n=4,seed=20".into()),
            ..request()
        },
        store.config(),
    )
    .unwrap();
    let diff = a.diff(&b).unwrap();
    assert_eq!(diff.fields(), vec!["sample"]);
}

#[test]
fn json_export_streams_flattened_records() {
    let (_dir, path) = setup_db();
    let store = Store::open(&path, SchemaKind::Cutout).unwrap();
    let mut prepared = store
        .filter([("category_common_name", "wheat")])
        .select(["image_path", "mask_path"])
        .execute()
        .unwrap();
    let mut out = Vec::new();
    let written = write_json(&mut out, prepared.records().unwrap()).unwrap();
    assert_eq!(written, 4);

    let rows: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows[0]["cutout_id"], "c03");
    assert_eq!(rows[0]["mask_path"], serde_json::Value::Null);
    assert_eq!(rows[1]["mask_path"], "masks/6.png");
    assert_eq!(rows[1]["json_path"], serde_json::Value::Null);
}
