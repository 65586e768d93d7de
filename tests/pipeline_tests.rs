use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tabular_etl::app::build_processor;
use tabular_etl::config::{Config, StoreBackend};
use tabular_etl::pipeline::{PipelineContext, RunSummary};
use tabular_etl::types::Stage;
use tempfile::{tempdir, TempDir};

const RULES: &str = r#"
semantic_tags:
  temporal:
    keywords: [date, created]
    data_types: [str]
  categorical:
    keywords: [region]
    data_types: [str]
  quantitative:
    keywords: [revenue]
    data_types: [number]
transformations:
  date_standardization:
    applies_to_tags: [temporal]
    format: "%Y-%m-%d"
  one_hot_encoding:
    applies_to_tags: [categorical]
    max_categories: 5
  numeric_normalization:
    applies_to_tags: [quantitative]
    method: min-max
    range: [0, 1]
"#;

fn context(dir: &TempDir) -> PipelineContext {
    let root = dir.path();
    fs::write(root.join("tags.yaml"), RULES).unwrap();

    let mut config = Config::default();
    config.data_root = root.join("data");
    config.logs_dir = root.join("logs");
    config.tags_path = root.join("tags.yaml");
    config.overrides_path = root.join("table_overrides.yaml");
    config.store.backend = StoreBackend::Sqlite;
    config.store.sqlite_path = root.join("warehouse.db");
    config.store.ledger_path = root.join("ledger.db");

    let ctx = PipelineContext::new(config);
    ctx.layout.ensure_all().unwrap();
    ctx
}

/// One pass of every stage, in pipeline order.
async fn run_all_once(ctx: &PipelineContext) -> Vec<RunSummary> {
    let mut summaries = Vec::new();
    for stage in [Stage::Extraction, Stage::Transformation, Stage::Loading] {
        let runner = ctx.runner(build_processor(ctx, stage).unwrap());
        summaries.push(runner.run_once().await.unwrap());
    }
    summaries
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_csv_travels_from_raw_to_archive() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    fs::write(
        ctx.layout.raw().join("sales.csv"),
        "User Name,order_date,region,revenue,select\n\
         alice,01/05/2024,east,100,a\n\
         bob,2024-02-10,west,300,b\n\
         carol,2024-03-01,east,500,c\n",
    )
    .unwrap();

    let summaries = run_all_once(&ctx).await;
    assert!(summaries.iter().all(|s| s.processed == 1 && s.failed == 0));

    assert!(file_names(&ctx.layout.raw()).is_empty());
    assert!(file_names(&ctx.layout.processed()).is_empty());
    assert!(file_names(&ctx.layout.enriched()).is_empty());
    assert_eq!(file_names(&ctx.layout.archived()), vec!["sales.json"]);

    let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT user_name, order_date, region_east, region_west, revenue, select_field, load_status \
             FROM sales ORDER BY rowid",
        )
        .unwrap();
    let rows: Vec<(String, String, bool, bool, f64, String, String)> = stmt
        .query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].0, "alice");
    assert_eq!(rows[0].1, "2024-01-05");
    assert!(rows[0].2 && !rows[0].3);
    assert!(!rows[1].2 && rows[1].3);
    let revenue: Vec<f64> = rows.iter().map(|r| r.4).collect();
    assert_eq!(revenue, vec![0.0, 0.5, 1.0]);
    assert_eq!(rows[2].5, "c");
    assert!(rows.iter().all(|r| r.6 == "loaded"));

    let loading_log = fs::read_to_string(ctx.config.logs_dir.join("loading_log.csv")).unwrap();
    let lines: Vec<&str> = loading_log.lines().collect();
    assert_eq!(lines[0], "timestamp,filename,table_name,row_count,status,archived_path");
    assert!(lines[1].contains(",sales.json,sales,3,success,"));
}

#[tokio::test]
async fn test_bad_file_is_logged_and_the_next_one_still_flows() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    fs::write(ctx.layout.raw().join("broken.json"), "{not json").unwrap();
    fs::write(
        ctx.layout.raw().join("signups.json"),
        r#"[{"id": 1, "createdAt": "2024-01-05T10:00:00"}, {"id": 2, "createdAt": "2024-01-06T08:30:00"}]"#,
    )
    .unwrap();
    fs::write(ctx.layout.raw().join("notes.txt"), "ignored").unwrap();

    let summaries = run_all_once(&ctx).await;
    assert_eq!(summaries[0], RunSummary { processed: 1, failed: 1 });
    assert_eq!(summaries[2], RunSummary { processed: 1, failed: 0 });

    assert_eq!(file_names(&ctx.layout.raw()), vec!["broken.json", "notes.txt"]);

    let extraction_log = fs::read_to_string(ctx.config.logs_dir.join("extraction_log.csv")).unwrap();
    let broken = extraction_log
        .lines()
        .find(|l| l.contains(",broken.json,"))
        .unwrap();
    assert!(broken.contains("error: Failed to parse"));
    assert_eq!(
        extraction_log.lines().filter(|l| l.starts_with("timestamp,")).count(),
        1
    );

    let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
    let created: Vec<String> = conn
        .prepare("SELECT created_at FROM signups ORDER BY id")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(created, vec!["2024-01-05", "2024-01-06"]);
}

#[tokio::test]
async fn test_redelivered_file_is_archived_without_second_insert() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let csv = "id,region\n1,east\n2,west\n";

    fs::write(ctx.layout.raw().join("events.csv"), csv).unwrap();
    run_all_once(&ctx).await;
    fs::write(ctx.layout.raw().join("events.csv"), csv).unwrap();
    let summaries = run_all_once(&ctx).await;
    assert_eq!(summaries[2], RunSummary { processed: 1, failed: 0 });

    let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);

    assert_eq!(file_names(&ctx.layout.archived()).len(), 2);
    let loading_log = fs::read_to_string(ctx.config.logs_dir.join("loading_log.csv")).unwrap();
    assert!(loading_log.contains("skipped: already loaded"));
}

#[tokio::test]
async fn test_csv_and_json_with_one_stem_both_load() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    fs::write(ctx.layout.raw().join("orders.csv"), "id,name\n1,from_csv\n").unwrap();
    fs::write(
        ctx.layout.raw().join("orders.json"),
        r#"[{"id": 2, "name": "from_json"}]"#,
    )
    .unwrap();

    let summaries = run_all_once(&ctx).await;
    assert!(summaries.iter().all(|s| *s == RunSummary { processed: 2, failed: 0 }));
    assert!(file_names(&ctx.layout.enriched()).is_empty());
    assert_eq!(file_names(&ctx.layout.archived()).len(), 2);

    let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
    let names: Vec<String> = conn
        .prepare("SELECT name FROM orders ORDER BY id")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names, vec!["from_csv", "from_json"]);
}

#[tokio::test]
async fn test_later_batch_with_missing_values_loads_into_existing_table() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);

    fs::write(ctx.layout.raw().join("people.csv"), "id,name\n1,ada\n2,bob\n").unwrap();
    run_all_once(&ctx).await;
    fs::write(ctx.layout.raw().join("people.csv"), "id,name\n3,\n4,dan\n").unwrap();
    let summaries = run_all_once(&ctx).await;

    assert_eq!(summaries[2], RunSummary { processed: 1, failed: 0 });
    assert!(file_names(&ctx.layout.enriched()).is_empty());

    let conn = Connection::open(dir.path().join("warehouse.db")).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM people", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 4);
    let unnamed: i64 = conn
        .query_row("SELECT id FROM people WHERE name IS NULL", [], |r| r.get(0))
        .unwrap();
    assert_eq!(unnamed, 3);
}

#[tokio::test]
async fn test_unreadable_rules_fail_at_startup() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    fs::write(&ctx.config.tags_path, "semantic_tags: [not, a, map]").unwrap();

    assert!(build_processor(&ctx, Stage::Transformation).is_err());
    assert!(build_processor(&ctx, Stage::Extraction).is_ok());
}
