//! Catalog resolution and inquiry planning over the fixture tree, with
//! canned backend results standing in for live databases.

mod common;

use arrow::datatypes::DataType;
use common::{empty_table, engine_with_results, ints, offline_engine, strings, table};
use mimir::model::Granularity;
use mimir::planner::InquiryRequest;

fn request(metrics: &[&str], dimensions: &[&str]) -> InquiryRequest {
    InquiryRequest {
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        ..InquiryRequest::default()
    }
}

#[test]
fn test_get_source() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let source = engine.catalog().get_source("my_source").unwrap();
    assert_eq!(source.name, "my_source");
    assert_eq!(source.time_col, "created_at");
    assert_eq!(
        source.local_dimensions,
        vec!["my_dimension", "my_other_dimension", "amount"]
    );
}

#[test]
fn test_get_metric() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let metric = engine.catalog().get_metric("my_metric").unwrap();
    assert_eq!(metric.name, "my_metric");
    assert_eq!(metric.source_name(), "my_source");
}

#[test]
fn test_get_dimension_synthesizes_local_stub() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let configured = engine.catalog().get_dimension("my_dimension").unwrap();
    assert_eq!(configured.name, "my_dimension");
    assert!(configured.is_local());

    // No config file: synthesized with the local sentinel.
    let stub = engine.catalog().get_dimension("improvised").unwrap();
    assert_eq!(stub.name, "improvised");
    assert_eq!(stub.source_name, "local");
}

#[test]
fn test_get_schema() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let schema = engine.schema().unwrap();
    let my_source = &schema["my_source"];
    assert!(my_source.dimensions.contains(&"my_dimension".to_string()));
    assert!(my_source.metrics.contains(&"my_metric".to_string()));
    assert_eq!(my_source.time_dimension, "created_at");

    let inventory = &schema["inventory"];
    assert_eq!(inventory.metrics, vec!["stock_level"]);
}

#[test]
fn test_missing_metric_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let err = engine.catalog().get_metric("missing").unwrap_err();
    assert!(err.to_string().contains("no file matching"));
}

#[test]
fn test_metric_with_unknown_source_errors() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let err = engine.catalog().get_metric("my_metric_bad_source").unwrap_err();
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_inquiry_single_source_plan() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric"], &["my_dimension"]))
        .unwrap();

    assert_eq!(inquiry.atomic_queries().len(), 1);
    let atomic = &inquiry.atomic_queries()[0];
    assert_eq!(atomic.source.name, "my_source");
    assert_eq!(atomic.metrics.len(), 1);
    assert_eq!(atomic.metrics[0].name, "my_metric");
    assert_eq!(atomic.dimensions.len(), 1);
    assert_eq!(atomic.dimensions[0].name, "my_dimension");

    // The combined query reads from the single intermediate table only.
    let combined = inquiry.combined_sql().unwrap();
    assert!(combined.contains(&atomic.name));
    assert!(!combined.contains("JOIN"));
}

#[test]
fn test_atomic_sql_shape() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric"], &["my_dimension"]))
        .unwrap();
    let sql = inquiry.atomic_queries()[0].sql();

    assert!(sql.starts_with("WITH my_source AS (SELECT created_at, my_dimension"));
    assert!(sql.contains("SELECT my_dimension, SUM(amount) AS my_metric FROM my_source"));
    assert!(sql.ends_with("GROUP BY 1"));
}

#[test]
fn test_inquiry_date_bounds_shift_end_by_one_day() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&InquiryRequest {
            start_date: Some("2025-01-01".to_string()),
            end_date: Some("2025-01-31".to_string()),
            ..request(&["my_metric"], &[])
        })
        .unwrap();
    let sql = inquiry.atomic_queries()[0].sql();
    assert!(sql.contains("created_at >= '2025-01-01' AND created_at < '2025-02-01'"));
}

#[test]
fn test_inquiry_rejects_unknown_dimension() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let err = engine
        .inquiry(&request(&["my_metric"], &["some_other_dimension"]))
        .unwrap_err()
        .to_string();
    assert!(err.contains("my_source"));
    assert!(err.contains("some_other_dimension"));
}

#[test]
fn test_inquiry_requires_metrics() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());
    assert!(engine.inquiry(&request(&[], &[])).is_err());
}

#[test]
fn test_inquiry_complex_filter_lands_in_atomic_where() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&InquiryRequest {
            global_filter: Some("my_dimension = 'A' AND my_metric > 10".to_string()),
            ..request(&["my_metric"], &["my_dimension"])
        })
        .unwrap();
    let sql = inquiry.atomic_queries()[0].sql();
    assert!(sql.contains("WHERE my_dimension = 'A' AND my_metric > 10"));
}

#[test]
fn test_inquiry_filter_with_unknown_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let err = engine
        .inquiry(&InquiryRequest {
            global_filter: Some("mystery_column = 1".to_string()),
            ..request(&["my_metric"], &["my_dimension"])
        })
        .unwrap_err();
    assert!(err.to_string().contains("mystery_column"));
}

#[test]
fn test_inquiry_multiple_dimensions_group_positionally() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(
            &["my_metric"],
            &["my_dimension", "my_other_dimension"],
        ))
        .unwrap();
    assert!(inquiry.atomic_queries()[0].sql().contains("GROUP BY 1, 2"));
}

#[test]
fn test_inquiry_order_by_lands_in_combined_sql() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&InquiryRequest {
            order_by: Some("my_metric DESC".to_string()),
            ..request(&["my_metric"], &["my_dimension"])
        })
        .unwrap();
    assert!(inquiry
        .combined_sql()
        .unwrap()
        .ends_with("ORDER BY my_metric DESC"));
}

#[test]
fn test_multi_source_plan_joins_on_shared_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric", "stock_level"], &["my_dimension"]))
        .unwrap();

    assert_eq!(inquiry.atomic_queries().len(), 2);
    let mut sources: Vec<&str> = inquiry
        .atomic_queries()
        .iter()
        .map(|aq| aq.source.name.as_str())
        .collect();
    sources.sort();
    assert_eq!(sources, vec!["inventory", "my_source"]);

    let combined = inquiry.combined_sql().unwrap();
    assert!(combined.contains("FULL JOIN"));
    assert!(combined.contains("USING(my_dimension)"));
}

#[test]
fn test_atomic_query_order_is_independent_of_request_order() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let forward = engine
        .inquiry(&request(&["my_metric", "stock_level"], &["my_dimension"]))
        .unwrap();
    let backward = engine
        .inquiry(&request(&["stock_level", "my_metric"], &["my_dimension"]))
        .unwrap();

    let sources = |inquiry: &mimir::Inquiry| -> Vec<String> {
        inquiry
            .atomic_queries()
            .iter()
            .map(|aq| aq.source.name.clone())
            .collect()
    };
    assert_eq!(sources(&forward), sources(&backward));
    assert_eq!(sources(&forward), vec!["inventory", "my_source"]);
}

#[test]
fn test_multi_source_without_dimensions_cross_joins() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric", "stock_level"], &[]))
        .unwrap();
    assert!(inquiry.combined_sql().unwrap().contains("CROSS JOIN"));
}

#[test]
fn test_metric_sql_stays_on_its_own_source() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric", "stock_level"], &["my_dimension"]))
        .unwrap();
    for atomic in inquiry.atomic_queries() {
        let sql = atomic.sql();
        match atomic.source.name.as_str() {
            "my_source" => {
                assert!(sql.contains("SUM(amount)"));
                assert!(!sql.contains("SUM(stock)"));
            }
            "inventory" => {
                assert!(sql.contains("SUM(stock)"));
                assert!(!sql.contains("SUM(amount)"));
            }
            other => panic!("unexpected source {other}"),
        }
    }
}

#[test]
fn test_granularity_buckets_and_joins_on_alias() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&InquiryRequest {
            granularity: Some(Granularity::Date),
            ..request(&["my_metric", "stock_level"], &[])
        })
        .unwrap();

    let sqls: Vec<String> = inquiry.atomic_queries().iter().map(|aq| aq.sql()).collect();
    assert!(sqls.iter().any(|sql| sql.contains("DATE(created_at) AS ds")));
    assert!(sqls.iter().any(|sql| sql.contains("DATE(snapshot_at) AS ds")));
    // Granularity + zero dimensions still groups by position 1.
    assert!(sqls.iter().all(|sql| sql.contains("GROUP BY 1")));

    let combined = inquiry.combined_sql().unwrap();
    assert!(combined.contains("USING(ds)"));
}

#[tokio::test]
async fn test_dispatch_single_source() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = engine_with_results(
        dir.path(),
        vec![(
            "my_connection",
            table(vec![
                ("my_dimension", strings(&["A", "B"])),
                ("my_metric", ints(&[10, 20])),
            ]),
        )],
    );

    let inquiry = engine
        .inquiry(&request(&["my_metric"], &["my_dimension"]))
        .unwrap();
    let result = inquiry.dispatch().await.unwrap();

    assert_eq!(result.column_names(), vec!["my_dimension", "my_metric"]);
    assert_eq!(result.num_rows(), 2);
}

#[tokio::test]
async fn test_dispatch_without_dimensions_returns_single_row() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = engine_with_results(
        dir.path(),
        vec![("my_connection", table(vec![("my_metric", ints(&[100]))]))],
    );

    let inquiry = engine.inquiry(&request(&["my_metric"], &[])).unwrap();
    let result = inquiry.dispatch().await.unwrap();
    assert_eq!(result.num_rows(), 1);
    assert_eq!(result.column_names(), vec!["my_metric"]);
}

#[tokio::test]
async fn test_dispatch_empty_result_keeps_columns() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = engine_with_results(
        dir.path(),
        vec![(
            "my_connection",
            empty_table(vec![
                ("my_dimension", DataType::Utf8),
                ("my_metric", DataType::Int64),
            ]),
        )],
    );

    let inquiry = engine
        .inquiry(&InquiryRequest {
            global_filter: Some("my_dimension = 'NonExistentValue'".to_string()),
            ..request(&["my_metric"], &["my_dimension"])
        })
        .unwrap();
    let result = inquiry.dispatch().await.unwrap();
    assert_eq!(result.num_rows(), 0);
    assert_eq!(result.column_names(), vec!["my_dimension", "my_metric"]);
}

#[tokio::test]
async fn test_dispatch_multi_source_full_outer_join_preserves_values() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = engine_with_results(
        dir.path(),
        vec![
            (
                "my_connection",
                table(vec![
                    ("my_dimension", strings(&["A", "B"])),
                    ("my_metric", ints(&[10, 20])),
                ]),
            ),
            (
                "inventory_connection",
                table(vec![
                    ("my_dimension", strings(&["B", "C"])),
                    ("stock_level", ints(&[5, 7])),
                ]),
            ),
        ],
    );

    let inquiry = engine
        .inquiry(&request(&["my_metric", "stock_level"], &["my_dimension"]))
        .unwrap();
    let result = inquiry.dispatch().await.unwrap();

    // A, B, C all survive; values missing on one side are NULL.
    assert_eq!(result.num_rows(), 3);
    // Metric columns follow the sorted-by-source metric order.
    assert_eq!(
        result.column_names(),
        vec!["my_dimension", "stock_level", "my_metric"]
    );
}

#[tokio::test]
async fn test_dispatch_multi_source_cross_join_yields_one_row() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = engine_with_results(
        dir.path(),
        vec![
            ("my_connection", table(vec![("my_metric", ints(&[100]))])),
            (
                "inventory_connection",
                table(vec![("stock_level", ints(&[42]))]),
            ),
        ],
    );

    let inquiry = engine
        .inquiry(&request(&["my_metric", "stock_level"], &[]))
        .unwrap();
    let result = inquiry.dispatch().await.unwrap();
    assert_eq!(result.num_rows(), 1);
}

#[tokio::test]
async fn test_dispatch_without_connections_fails_with_query_error() {
    let dir = tempfile::tempdir().unwrap();
    common::write_fixtures(dir.path());
    let engine = offline_engine(dir.path());

    let inquiry = engine
        .inquiry(&request(&["my_metric"], &["my_dimension"]))
        .unwrap();
    let err = inquiry.dispatch().await.unwrap_err();
    assert!(err.to_string().contains("no active connection"));
}
