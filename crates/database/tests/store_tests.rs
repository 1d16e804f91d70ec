use anyhow::Result;
use chrono::NaiveDate;
use core_types::{parse_datetime, DType, Value};
use database::{InsertFrame, InsertMode, QueryFilter, Record, StoreCatalog, StoreError};
use tempfile::TempDir;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn catalog() -> (TempDir, StoreCatalog) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = StoreCatalog::new(dir.path().join("custom"));
    (dir, catalog)
}

fn values(catalog_rows: &database::QueryResult) -> Vec<(NaiveDate, i64, Vec<Option<Value>>)> {
    catalog_rows
        .rows
        .iter()
        .map(|r| (r.date, r.asset_id, r.values.clone()))
        .collect()
}

#[tokio::test]
async fn fundamentals_end_to_end() -> Result<()> {
    let (_dir, catalog) = catalog();
    let path = catalog
        .create("fundamentals-daily", [("pe_ratio", "float"), ("sector", "int")], "1d")
        .await?;
    assert!(path.ends_with("fundamentals-daily.db"));

    let dates = vec![day(2022, 1, 3), day(2022, 1, 4), day(2022, 1, 5)];
    let keys = vec![
        ("pe_ratio".to_string(), 1),
        ("pe_ratio".to_string(), 2),
        ("sector".to_string(), 1),
        ("sector".to_string(), 2),
    ];
    let rows = dates
        .iter()
        .enumerate()
        .map(|(i, _)| {
            vec![
                Some(Value::Float64(10.0 + i as f64)),
                Some(Value::Float64(20.0 + i as f64)),
                Some(Value::Int64(5)),
                Some(Value::Int64(7)),
            ]
        })
        .collect();
    let frame = InsertFrame::MultiField {
        dates,
        keys,
        values: rows,
    };
    assert_eq!(catalog.insert("fundamentals-daily", &frame, InsertMode::Replace).await?, 6);

    let filter = QueryFilter::between(day(2022, 1, 3), day(2022, 1, 4)).assets([1]);
    let result = catalog.query("fundamentals-daily", &filter).await?;
    assert_eq!(
        values(&result),
        vec![
            (day(2022, 1, 3), 1, vec![Some(Value::Float64(10.0)), Some(Value::Int64(5))]),
            (day(2022, 1, 4), 1, vec![Some(Value::Float64(11.0)), Some(Value::Int64(5))]),
        ]
    );
    assert!(result.rows.iter().all(|r| r.inserted_at.is_some()));

    let unknown = catalog
        .query("fundamentals-daily", &QueryFilter::default().assets([99]))
        .await?;
    assert!(unknown.is_empty());
    Ok(())
}

#[tokio::test]
async fn every_dtype_round_trips() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog
        .create(
            "mixed",
            [
                ("f", DType::Float64),
                ("i", DType::Int64),
                ("b", DType::Bool),
                ("t", DType::Text),
                ("ts", DType::DateTime),
            ],
            "1d",
        )
        .await?;

    let stamp = parse_datetime("2021-06-01T16:00:00.250")?;
    let records = vec![
        Record::new(day(2021, 6, 1), 3)
            .with("f", 1.25)
            .with("i", -4i64)
            .with("b", true)
            .with("t", "tech")
            .with("ts", stamp),
        Record::new(day(2021, 6, 2), 3).with("b", false),
    ];
    catalog
        .insert("mixed", &InsertFrame::Records(records), InsertMode::Replace)
        .await?;

    let result = catalog.query("mixed", &QueryFilter::default()).await?;
    assert_eq!(result.len(), 2);
    assert_eq!(result.value(0, "f"), Some(&Value::Float64(1.25)));
    assert_eq!(result.value(0, "i"), Some(&Value::Int64(-4)));
    assert_eq!(result.value(0, "b"), Some(&Value::Bool(true)));
    assert_eq!(result.value(0, "t"), Some(&Value::Text("tech".into())));
    assert_eq!(result.value(0, "ts"), Some(&Value::DateTime(stamp)));
    assert_eq!(result.value(1, "b"), Some(&Value::Bool(false)));
    assert_eq!(result.value(1, "f"), None);
    Ok(())
}

#[tokio::test]
async fn append_conflicts_and_update_overwrites() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("v", "float")], "1d").await?;

    let first = InsertFrame::Records(vec![Record::new(day(2020, 1, 1), 1).with("v", 1.0)]);
    catalog.insert("x", &first, InsertMode::Append).await?;

    let again = catalog.insert("x", &first, InsertMode::Append).await;
    assert!(matches!(again, Err(StoreError::Conflict(_))));

    let newer = InsertFrame::Records(vec![Record::new(day(2020, 1, 1), 1).with("v", 2.0)]);
    catalog.insert("x", &newer, InsertMode::Update).await?;
    let result = catalog.query("x", &QueryFilter::default()).await?;
    assert_eq!(result.len(), 1);
    assert_eq!(result.value(0, "v"), Some(&Value::Float64(2.0)));
    Ok(())
}

#[tokio::test]
async fn failed_append_writes_nothing() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("v", "float")], "1d").await?;
    let existing = InsertFrame::Records(vec![Record::new(day(2020, 1, 2), 1).with("v", 1.0)]);
    catalog.insert("x", &existing, InsertMode::Append).await?;

    // Ordered by date, so the new 2020-01-01 row is written before the conflict.
    let batch = InsertFrame::Records(vec![
        Record::new(day(2020, 1, 1), 1).with("v", 5.0),
        Record::new(day(2020, 1, 2), 1).with("v", 6.0),
    ]);
    let err = catalog.insert("x", &batch, InsertMode::Append).await;
    assert!(matches!(err, Err(StoreError::Conflict(_))));

    let result = catalog.query("x", &QueryFilter::default()).await?;
    assert_eq!(
        values(&result),
        vec![(day(2020, 1, 2), 1, vec![Some(Value::Float64(1.0))])]
    );
    Ok(())
}

#[tokio::test]
async fn update_twice_matches_update_once() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("a", "float"), ("b", "int")], "1d").await?;
    let frame = InsertFrame::Records(vec![
        Record::new(day(2020, 1, 1), 1).with("a", 1.5).with("b", 3i64),
        Record::new(day(2020, 1, 1), 2).with("a", 2.5),
    ]);

    catalog.insert("x", &frame, InsertMode::Update).await?;
    let once = catalog.query("x", &QueryFilter::default()).await?;
    catalog.insert("x", &frame, InsertMode::Update).await?;
    let twice = catalog.query("x", &QueryFilter::default()).await?;
    assert_eq!(values(&once), values(&twice));
    Ok(())
}

#[tokio::test]
async fn update_replaces_the_whole_row() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("a", "float"), ("b", "int")], "1d").await?;
    let full = InsertFrame::Records(vec![Record::new(day(2020, 1, 1), 1).with("a", 1.0).with("b", 9i64)]);
    catalog.insert("x", &full, InsertMode::Replace).await?;

    let partial = InsertFrame::Records(vec![Record::new(day(2020, 1, 1), 1).with("a", 2.0)]);
    catalog.insert("x", &partial, InsertMode::Update).await?;
    let result = catalog.query("x", &QueryFilter::default()).await?;
    assert_eq!(result.value(0, "a"), Some(&Value::Float64(2.0)));
    assert_eq!(result.value(0, "b"), None);
    Ok(())
}

#[tokio::test]
async fn replace_clears_existing_rows() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("v", "float")], "1d").await?;
    let first = InsertFrame::SingleField {
        dates: vec![day(2020, 1, 1), day(2020, 1, 2)],
        assets: vec![1, 2],
        values: vec![
            vec![Some(Value::Float64(1.0)), Some(Value::Float64(2.0))],
            vec![Some(Value::Float64(3.0)), None],
        ],
    };
    assert_eq!(catalog.insert("x", &first, InsertMode::Replace).await?, 3);

    let second = InsertFrame::Records(vec![Record::new(day(2021, 1, 1), 5).with("v", 7.0)]);
    catalog.insert("x", &second, InsertMode::Replace).await?;
    let result = catalog.query("x", &QueryFilter::default()).await?;
    assert_eq!(
        values(&result),
        vec![(day(2021, 1, 1), 5, vec![Some(Value::Float64(7.0))])]
    );

    catalog.insert("x", &InsertFrame::Records(Vec::new()), InsertMode::Replace).await?;
    assert!(catalog.query("x", &QueryFilter::default()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn create_validates_before_touching_disk() -> Result<()> {
    let (_dir, catalog) = catalog();

    let bad_code = catalog.create("Test-DB", [("v", "float")], "1d").await;
    assert!(matches!(bad_code, Err(StoreError::Configuration(_))));
    let reserved = catalog.create("ok", [("asset_id", "int")], "1d").await;
    assert!(matches!(reserved, Err(StoreError::Configuration(_))));
    let bad_dtype = catalog.create("ok", [("v", "decimal")], "1d").await;
    assert!(matches!(bad_dtype, Err(StoreError::Configuration(_))));
    assert!(!catalog.exists("ok"));

    catalog.create("ok", [("v", "float")], "1d").await?;
    let duplicate = catalog.create("ok", [("v", "float")], "1d").await;
    assert!(matches!(duplicate, Err(StoreError::AlreadyExists { .. })));
    Ok(())
}

#[tokio::test]
async fn failed_create_leaves_no_store_behind() -> Result<()> {
    let (_dir, catalog) = catalog();
    // A directory where SQLite wants its rollback journal makes the schema write fail.
    let journal = catalog.root().join("blocked.db-journal");
    std::fs::create_dir_all(&journal)?;

    let result = catalog.create("blocked", [("v", "float")], "1d").await;
    assert!(result.is_err());
    assert!(!catalog.exists("blocked"));
    assert!(!catalog.path_of("blocked").exists());
    Ok(())
}

#[tokio::test]
async fn list_info_and_drop() -> Result<()> {
    let (_dir, catalog) = catalog();
    assert!(catalog.list().await?.is_empty());

    catalog.create("zeta", [("v", "float")], "1m").await?;
    catalog.create("alpha", [("pe_ratio", "float"), ("sector", "int")], "1d").await?;
    std::fs::write(catalog.root().join("junk.db"), b"not a database")?;

    let listed = catalog.list().await?;
    let codes: Vec<_> = listed.iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["alpha", "zeta"]);

    let frame = InsertFrame::Records(vec![
        Record::new(day(2020, 1, 1), 1).with("pe_ratio", 3.0),
        Record::new(day(2020, 1, 1), 2).with("sector", 4i64),
    ]);
    catalog.insert("alpha", &frame, InsertMode::Replace).await?;
    let info = catalog.info("alpha").await?;
    assert_eq!(info.bar_size, "1d");
    assert_eq!(info.row_count, 2);
    assert!(info.size_bytes > 0);
    let names: Vec<_> = info.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["pe_ratio", "sector"]);
    assert_eq!(info.columns[1].dtype, DType::Int64);

    catalog.drop_store("alpha").await?;
    assert!(!catalog.exists("alpha"));
    assert!(matches!(catalog.info("alpha").await, Err(StoreError::NotFound(_))));
    assert!(matches!(catalog.drop_store("alpha").await, Err(StoreError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn unknown_codes_are_not_found() {
    let (_dir, catalog) = catalog();
    let frame = InsertFrame::Records(Vec::new());
    assert!(matches!(
        catalog.insert("missing", &frame, InsertMode::Append).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        catalog.query("missing", &QueryFilter::default()).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(catalog.schema("missing").await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn query_validates_columns_and_handles_empty_filters() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("x", [("a", "float"), ("b", "float")], "1d").await?;
    let frame = InsertFrame::Records(vec![Record::new(day(2020, 1, 1), 1).with("a", 1.0).with("b", 2.0)]);
    catalog.insert("x", &frame, InsertMode::Replace).await?;

    let unknown = catalog.query("x", &QueryFilter::default().columns(["c"])).await;
    assert!(matches!(unknown, Err(StoreError::Configuration(_))));

    let only_b = catalog.query("x", &QueryFilter::default().columns(["b"])).await?;
    assert_eq!(only_b.columns.len(), 1);
    assert_eq!(only_b.value(0, "b"), Some(&Value::Float64(2.0)));

    let no_assets = catalog
        .query("x", &QueryFilter::default().assets(Vec::new()))
        .await?;
    assert!(no_assets.is_empty());

    let after = catalog
        .query("x", &QueryFilter::between(day(2020, 1, 2), day(2020, 12, 31)))
        .await?;
    assert!(after.is_empty());
    Ok(())
}

#[tokio::test]
async fn asset_filters_scale_past_the_sql_variable_limit() -> Result<()> {
    let (_dir, catalog) = catalog();
    catalog.create("wide", [("v", "float")], "1d").await?;
    let frame = InsertFrame::Records(vec![
        Record::new(day(2021, 6, 1), 7).with("v", 1.5),
        Record::new(day(2021, 6, 1), 39_999).with("v", 2.5),
        Record::new(day(2021, 6, 1), 50_000).with("v", 3.5),
    ]);
    catalog.insert("wide", &frame, InsertMode::Replace).await?;

    let universe: Vec<i64> = (0..40_000).collect();
    let result = catalog
        .query("wide", &QueryFilter::default().assets(universe))
        .await?;
    assert_eq!(
        values(&result),
        vec![
            (day(2021, 6, 1), 7, vec![Some(Value::Float64(1.5))]),
            (day(2021, 6, 1), 39_999, vec![Some(Value::Float64(2.5))]),
        ]
    );
    Ok(())
}
