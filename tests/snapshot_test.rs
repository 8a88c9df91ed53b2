mod common;

use cdc_sync::engine::SnapshotMode;
use cdc_sync::source::{ColumnDef, SourceEndpoint, TableDef};
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_initial_snapshot_copies_everything() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::Initial)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;

    let snap = h.control.snapshot_stats_view("c1");
    assert_eq!(snap.tables_migrated, INVENTORY_TABLES as u64);
    assert_eq!(snap.rows_migrated, INVENTORY_ROWS);
    assert!(snap.snapshot_begin_ms.is_some());
    assert!(snap.snapshot_end_ms.unwrap() >= snap.snapshot_begin_ms.unwrap());

    // destination schema lives under the source database name
    let tables = h.target.tables_in_schema("inventory");
    assert_eq!(tables.len(), INVENTORY_TABLES);
    assert_eq!(h.target.rows("inventory.orders").len(), 4);
    assert_eq!(h.target.rows("inventory.customers").len(), 4);

    // values survive projection: ints as ints, strings as strings
    let numbers = h.target.column_values("inventory.orders", "order_number");
    assert!(numbers.contains(&json!(10003)));
    let purchasers = h.target.column_values("inventory.orders", "purchaser");
    assert!(purchasers.contains(&json!(1003)));
    let emails = h.target.column_values("inventory.customers", "email");
    assert!(emails.contains(&json!("sally.thomas@acme.com")));

    // streaming picks up where the copy left off
    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.orders",
        json!({
            "order_number": 10005,
            "order_date": "2016-03-01",
            "purchaser": 1004,
            "quantity": 1,
            "product_id": 101,
        }),
    ));
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.orders").len(), 5);

    let view = h.control.state_view().await;
    assert_eq!(view[0].stage, "change data capture");

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_no_data_mode_skips_existing_rows() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;

    // schema exists, rows were not copied
    assert!(h.target.table_exists("inventory.orders"));
    assert!(h.target.rows("inventory.orders").is_empty());
    assert_eq!(h.control.snapshot_stats_view("c1").tables_migrated, 0);

    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.products_on_hand",
        json!({"product_id": 109, "quantity": 5}),
    ));
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.products_on_hand").len(), 1);

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_schema_sync_mode_parks_until_resumed() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::SchemaSync)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "paused").await;

    let view = h.control.state_view().await;
    assert_eq!(view[0].stage, "schema sync");
    assert!(h.target.table_exists("inventory.customers"));
    assert!(h.target.rows("inventory.customers").is_empty());

    // events queued while parked are not consumed
    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.geom",
        json!({"id": 2, "g": "POINT(2 2)"}),
    ));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.target.rows("inventory.geom").is_empty());

    h.control.resume_engine("c1").await.unwrap();
    wait_state(&h.control, "c1", "polling").await;
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.geom").len(), 1);
    assert_eq!(h.control.state_view().await[0].stage, "change data capture");

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_snapshot_table_filter_limits_the_copy_only() {
    let h = harness().await;
    let mut info = mysql_conninfo("c1");
    info.snapshot_table_filter = Some("inventory.orders".into());
    h.control.add_conninfo(info).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::Initial)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;

    assert_eq!(h.control.snapshot_stats_view("c1").tables_migrated, 1);
    assert_eq!(h.target.rows("inventory.orders").len(), 4);
    assert!(h.target.rows("inventory.customers").is_empty());

    // streaming is governed by the capture filter, not the snapshot filter
    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.customers",
        json!({"id": 1005, "first_name": "Pam", "last_name": "Beesly", "email": "pam@dm.com"}),
    ));
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.customers").len(), 1);

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_capture_filter_drops_other_tables() {
    let h = harness().await;
    let mut info = mysql_conninfo("c1");
    info.table_filter = Some("inventory.orders,inventory.customers".into());
    h.control.add_conninfo(info).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::Initial)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;

    assert_eq!(h.control.snapshot_stats_view("c1").tables_migrated, 2);
    assert!(h.target.table_exists("inventory.orders"));
    assert!(!h.target.table_exists("inventory.products"));

    // filtered tables are ignored in streaming too
    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.products",
        json!({"id": 110, "name": "jacket", "description": "water resistent", "weight": 0.1}),
    ));
    h.hub.get("c1").unwrap().push(insert_event(
        "inventory.orders",
        json!({"order_number": 10005, "order_date": "2016-03-01", "purchaser": 1001, "quantity": 1, "product_id": 102}),
    ));
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.orders").len(), 5);
    assert!(!h.target.table_exists("inventory.products"));

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_typed_values_round_trip() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();

    let ep = SourceEndpoint::new();
    let typed_col = |name: &str, type_name: &str, pk: bool| ColumnDef {
        name: name.to_string(),
        type_name: type_name.to_string(),
        primary_key: pk,
        autoincrement: pk,
    };
    ep.define_table(TableDef {
        name: "inventory.typed".into(),
        columns: vec![
            typed_col("id", "int", true),
            typed_col("payload", "blob", false),
            typed_col("created", "datetime(6)", false),
            typed_col("flag", "bit(1)", false),
            typed_col("doc", "json", false),
        ],
    });
    ep.load_row(
        "inventory.typed",
        row(json!({
            "id": 1,
            "payload": "0xDEADBEEF",
            "created": "2024-01-02 03:04:05.123456789",
            "flag": 1,
            "doc": "{\"a\": 1}",
        })),
    );
    h.hub.attach("c1", ep);

    h.control
        .start_engine("c1", SnapshotMode::Initial)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;

    // one destination row, each value under its type's conversion: hex
    // becomes a byte sequence (base64), sub-second timestamps truncate to
    // six digits, bit(1) becomes boolean, json documents are parsed
    let rows = h.target.rows("inventory.typed");
    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r["payload"], json!("3q2+7w=="));
    assert_eq!(r["created"], json!("2024-01-02 03:04:05.123456"));
    assert_eq!(r["flag"], json!(true));
    assert_eq!(r["doc"], json!({"a": 1}));

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_always_mode_recopies_on_restart() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::Always)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;
    assert_eq!(
        h.control.snapshot_stats_view("c1").tables_migrated,
        INVENTORY_TABLES as u64
    );
    h.control.stop_engine("c1").await.unwrap();

    // fresh endpoint so the scripted snapshot cursor starts over
    h.hub.attach("c1", inventory_endpoint());
    h.control
        .start_engine("c1", SnapshotMode::Always)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;
    assert_eq!(
        h.control.snapshot_stats_view("c1").tables_migrated,
        2 * INVENTORY_TABLES as u64
    );

    h.control.stop_engine("c1").await.unwrap();
}
