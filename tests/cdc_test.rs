mod common;

use cdc_sync::engine::SnapshotMode;
use cdc_sync::source::{ColumnDef, DdlEvent, DdlOp, RowEvent, RowOp, SourceEvent, TableDef};
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_insert_update_delete_flow() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::Initial)
        .await
        .unwrap();
    wait_settled(&h.control, "c1").await;
    let ep = h.hub.get("c1").unwrap();

    ep.push(insert_event(
        "inventory.customers",
        json!({"id": 1005, "first_name": "Jim", "last_name": "Halpert", "email": "jim@dm.com"}),
    ));
    ep.push(update_event(
        "inventory.customers",
        json!({"id": 1001, "first_name": "Sally", "last_name": "Thomas", "email": "sally.thomas@acme.com"}),
        json!({"id": 1001, "first_name": "Sally", "last_name": "Thomas", "email": "sally@acme.com"}),
    ));
    ep.push(delete_event(
        "inventory.customers",
        json!({"id": 1004, "first_name": "Anne", "last_name": "Kretchmar", "email": "annek@noanswer.org"}),
    ));
    wait_settled(&h.control, "c1").await;

    let rows = h.target.rows("inventory.customers");
    assert_eq!(rows.len(), 4); // 4 snapshot + 1 insert - 1 delete
    assert!(rows.iter().any(|r| r["id"] == json!(1005)));
    assert!(rows
        .iter()
        .any(|r| r["id"] == json!(1001) && r["email"] == json!("sally@acme.com")));
    assert!(!rows.iter().any(|r| r["id"] == json!(1004)));

    let stats = h.control.cdc_stats_view("c1");
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.updates, 1);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.dmls, 3);
    assert_eq!(stats.bad_events, 0);
    assert!(stats.batches_done >= 1);

    // checkpoint pairs are ordered sensibly
    assert!(stats.first_src_ts_ms.unwrap() <= stats.last_src_ts_ms.unwrap());
    assert!(stats.last_sink_ts_ms.unwrap() >= stats.last_recv_ts_ms.unwrap());

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_malformed_events_are_counted_and_skipped() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;
    let ep = h.hub.get("c1").unwrap();

    // delete without a before image cannot be keyed
    ep.push(SourceEvent::Row(RowEvent {
        table: "inventory.customers".into(),
        op: RowOp::Delete,
        before: None,
        after: None,
        src_ts_ms: 1,
    }));
    ep.push(insert_event(
        "inventory.customers",
        json!({"id": 1006, "first_name": "Dwight", "last_name": "Schrute", "email": "ds@dm.com"}),
    ));
    wait_settled(&h.control, "c1").await;

    let stats = h.control.cdc_stats_view("c1");
    assert_eq!(stats.bad_events, 1);
    assert_eq!(stats.creates, 1);
    // the bad event did not take the connector down
    assert_eq!(h.control.state_view().await[0].state, "polling");
    assert_eq!(h.target.rows("inventory.customers").len(), 1);

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_stream_read_failure_reconnects() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    let ep = inventory_endpoint();
    h.hub.attach("c1", ep.clone());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;
    let sessions_before = ep.session_count();

    ep.fail_next_reads(2);
    ep.push(insert_event(
        "inventory.geom",
        json!({"id": 5, "g": "POINT(5 5)"}),
    ));
    wait_settled(&h.control, "c1").await;

    assert!(ep.session_count() > sessions_before);
    assert_eq!(h.target.rows("inventory.geom").len(), 1);
    assert_eq!(h.control.state_view().await[0].state, "polling");

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_persistent_stream_failure_escalates() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    let ep = inventory_endpoint();
    h.hub.attach("c1", ep.clone());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;

    ep.fail_next_reads(100);
    wait_state(&h.control, "c1", "error").await;
    assert!(h.control.state_view().await[0].err.contains("stream"));

    // manual restart recovers once the source behaves again
    ep.fail_next_reads(0);
    h.control
        .restart_connector("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_ddl_events_evolve_the_destination() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;
    let ep = h.hub.get("c1").unwrap();
    // the destination-schema batch already counted one DDL per table
    let ddls_baseline = h.control.cdc_stats_view("c1").ddls;

    // new table appears mid-stream, followed by a row for it
    ep.push(SourceEvent::Ddl(DdlEvent {
        op: DdlOp::CreateTable(TableDef {
            name: "inventory.suppliers".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    type_name: "int".into(),
                    primary_key: true,
                    autoincrement: true,
                },
                ColumnDef {
                    name: "name".into(),
                    type_name: "varchar(255)".into(),
                    primary_key: false,
                    autoincrement: false,
                },
            ],
        }),
        src_ts_ms: 1,
    }));
    ep.push(insert_event(
        "inventory.suppliers",
        json!({"id": 1, "name": "Acme Corp"}),
    ));
    ep.push(SourceEvent::Ddl(DdlEvent {
        op: DdlOp::AddColumn {
            table: "inventory.suppliers".into(),
            column: ColumnDef {
                name: "city".into(),
                type_name: "varchar(255)".into(),
                primary_key: false,
                autoincrement: false,
            },
        },
        src_ts_ms: 2,
    }));
    ep.push(insert_event(
        "inventory.suppliers",
        json!({"id": 2, "name": "Globex", "city": "Springfield"}),
    ));
    wait_settled(&h.control, "c1").await;

    assert!(h.target.table_exists("inventory.suppliers"));
    let cols = h.target.columns("inventory.suppliers").unwrap();
    assert!(cols.iter().any(|c| c.name == "city"));
    let rows = h.target.rows("inventory.suppliers");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["city"] == json!("Springfield")));

    ep.push(SourceEvent::Ddl(DdlEvent {
        op: DdlOp::DropColumn {
            table: "inventory.suppliers".into(),
            column: "city".into(),
        },
        src_ts_ms: 3,
    }));
    ep.push(SourceEvent::Ddl(DdlEvent {
        op: DdlOp::DropTable {
            table: "inventory.geom".into(),
        },
        src_ts_ms: 4,
    }));
    wait_settled(&h.control, "c1").await;

    let cols = h.target.columns("inventory.suppliers").unwrap();
    assert!(!cols.iter().any(|c| c.name == "city"));
    assert!(!h.target.table_exists("inventory.geom"));

    let stats = h.control.cdc_stats_view("c1");
    assert_eq!(stats.ddls - ddls_baseline, 4);
    assert_eq!(stats.creates, 2);

    h.control.stop_engine("c1").await.unwrap();
}

#[tokio::test]
async fn test_pause_holds_events_until_resume() {
    let h = harness().await;
    h.control.add_conninfo(mysql_conninfo("c1")).await.unwrap();
    h.hub.attach("c1", inventory_endpoint());

    h.control
        .start_engine("c1", SnapshotMode::NoData)
        .await
        .unwrap();
    wait_state(&h.control, "c1", "polling").await;

    h.control.pause_engine("c1").await.unwrap();
    wait_state(&h.control, "c1", "paused").await;

    let ep = h.hub.get("c1").unwrap();
    ep.push(insert_event(
        "inventory.addresses",
        json!({"id": 11, "customer_id": 1002, "street": "1 Main St", "city": "Dunmore"}),
    ));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.target.rows("inventory.addresses").is_empty());

    h.control.resume_engine("c1").await.unwrap();
    wait_settled(&h.control, "c1").await;
    assert_eq!(h.target.rows("inventory.addresses").len(), 1);

    h.control.stop_engine("c1").await.unwrap();
}
