//! Shared harness: a control plane over the in-memory target, fed by a
//! scripted "inventory" source fixture.

#![allow(dead_code)]

use cdc_sync::config::EngineConfig;
use cdc_sync::conninfo::{ConnectionInfo, Vendor};
use cdc_sync::source::{
    ColumnDef, Row, RowEvent, RowOp, SourceEndpoint, SourceEvent, SourceHub, TableDef,
};
use cdc_sync::target::MemoryTarget;
use cdc_sync::ControlPlane;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub control: ControlPlane,
    pub target: Arc<MemoryTarget>,
    pub hub: SourceHub,
    _meta: TempDir,
}

pub async fn harness() -> Harness {
    let meta = TempDir::new().unwrap();
    let mut cfg = EngineConfig::default();
    cfg.metadata_dir = meta.path().to_path_buf();
    cfg.batch.max_events = 8;
    cfg.batch.max_delay_ms = 20;
    cfg.batch.snapshot_rows = 2;
    cfg.worker.poll_interval_ms = 2;
    cfg.worker.retry_backoff_ms = 5;
    cfg.worker.settle_polls = 3;

    let target = Arc::new(MemoryTarget::new());
    let hub = SourceHub::new();
    let control = ControlPlane::open(cfg, target.clone(), hub.clone())
        .await
        .unwrap();
    Harness {
        control,
        target,
        hub,
        _meta: meta,
    }
}

pub fn mysql_conninfo(name: &str) -> ConnectionInfo {
    ConnectionInfo {
        name: name.to_string(),
        hostname: "127.0.0.1".to_string(),
        port: 3306,
        username: "mysqluser".to_string(),
        password: "mysqlpwd".to_string(),
        srcdb: "inventory".to_string(),
        dstdb: "postgres".to_string(),
        table_filter: None,
        snapshot_table_filter: None,
        vendor: Vendor::Mysql,
        extra: None,
        olr: None,
    }
}

fn col(name: &str, type_name: &str, pk: bool) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        type_name: type_name.to_string(),
        primary_key: pk,
        autoincrement: pk,
    }
}

/// Build a row object from a `json!({..})` literal.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object literal, got {}", other),
    }
}

/// The nine-table "inventory" demo source, pre-loaded with existing rows.
pub fn inventory_endpoint() -> SourceEndpoint {
    let ep = SourceEndpoint::new();

    ep.define_table(TableDef {
        name: "inventory.orders".into(),
        columns: vec![
            col("order_number", "int", true),
            col("order_date", "date", false),
            col("purchaser", "int", false),
            col("quantity", "int", false),
            col("product_id", "int", false),
        ],
    });
    for (n, date, purchaser, qty, product) in [
        (10001, "2016-01-16", 1001, 1, 102),
        (10002, "2016-01-17", 1002, 2, 105),
        (10003, "2016-02-19", 1002, 2, 106),
        (10004, "2016-02-21", 1003, 1, 107),
    ] {
        ep.load_row(
            "inventory.orders",
            row(json!({
                "order_number": n,
                "order_date": date,
                "purchaser": purchaser,
                "quantity": qty,
                "product_id": product,
            })),
        );
    }

    ep.define_table(TableDef {
        name: "inventory.customers".into(),
        columns: vec![
            col("id", "int", true),
            col("first_name", "varchar(255)", false),
            col("last_name", "varchar(255)", false),
            col("email", "varchar(255)", false),
        ],
    });
    for (id, first, last, email) in [
        (1001, "Sally", "Thomas", "sally.thomas@acme.com"),
        (1002, "George", "Bailey", "gbailey@foobar.com"),
        (1003, "Edward", "Walker", "ed@walker.com"),
        (1004, "Anne", "Kretchmar", "annek@noanswer.org"),
    ] {
        ep.load_row(
            "inventory.customers",
            row(json!({
                "id": id,
                "first_name": first,
                "last_name": last,
                "email": email,
            })),
        );
    }

    ep.define_table(TableDef {
        name: "inventory.products".into(),
        columns: vec![
            col("id", "int", true),
            col("name", "varchar(255)", false),
            col("description", "varchar(512)", false),
            col("weight", "float", false),
        ],
    });
    for (id, name, desc, weight) in [
        (101, "scooter", "Small 2-wheel scooter", 3.14),
        (102, "car battery", "12V car battery", 8.1),
        (103, "hammer", "12oz carpenter's hammer", 0.75),
    ] {
        ep.load_row(
            "inventory.products",
            row(json!({
                "id": id,
                "name": name,
                "description": desc,
                "weight": weight,
            })),
        );
    }

    ep.define_table(TableDef {
        name: "inventory.products_on_hand".into(),
        columns: vec![col("product_id", "int", true), col("quantity", "int", false)],
    });
    for (product, qty) in [(101, 3), (102, 8), (103, 18)] {
        ep.load_row(
            "inventory.products_on_hand",
            row(json!({"product_id": product, "quantity": qty})),
        );
    }

    ep.define_table(TableDef {
        name: "inventory.addresses".into(),
        columns: vec![
            col("id", "int", true),
            col("customer_id", "int", false),
            col("street", "varchar(255)", false),
            col("city", "varchar(255)", false),
        ],
    });
    ep.load_row(
        "inventory.addresses",
        row(json!({
            "id": 10,
            "customer_id": 1001,
            "street": "3183 Moore Avenue",
            "city": "Euless",
        })),
    );

    ep.define_table(TableDef {
        name: "inventory.geom".into(),
        columns: vec![col("id", "int", true), col("g", "varchar(255)", false)],
    });
    ep.load_row("inventory.geom", row(json!({"id": 1, "g": "POINT(1 1)"})));

    ep.define_table(TableDef {
        name: "inventory.staff".into(),
        columns: vec![
            col("id", "int", true),
            col("name", "varchar(255)", false),
            col("email", "varchar(255)", false),
        ],
    });
    for (id, name, email) in [
        (1, "Mike Hillyer", "mike@inventory.test"),
        (2, "Jon Stephens", "jon@inventory.test"),
    ] {
        ep.load_row(
            "inventory.staff",
            row(json!({"id": id, "name": name, "email": email})),
        );
    }

    ep.define_table(TableDef {
        name: "inventory.stores".into(),
        columns: vec![
            col("id", "int", true),
            col("name", "varchar(255)", false),
            col("city", "varchar(255)", false),
        ],
    });
    ep.load_row(
        "inventory.stores",
        row(json!({"id": 1, "name": "Main Street", "city": "Lethbridge"})),
    );

    ep.define_table(TableDef {
        name: "inventory.categories".into(),
        columns: vec![col("id", "int", true), col("name", "varchar(255)", false)],
    });
    for (id, name) in [(1, "Transport"), (2, "Tools")] {
        ep.load_row("inventory.categories", row(json!({"id": id, "name": name})));
    }

    ep
}

pub const INVENTORY_TABLES: usize = 9;
pub const INVENTORY_ROWS: u64 = 4 + 4 + 3 + 3 + 1 + 1 + 2 + 1 + 2;

pub fn insert_event(table: &str, after: Value) -> SourceEvent {
    SourceEvent::Row(RowEvent {
        table: table.to_string(),
        op: RowOp::Create,
        before: None,
        after: Some(row(after)),
        src_ts_ms: now_ms(),
    })
}

pub fn update_event(table: &str, before: Value, after: Value) -> SourceEvent {
    SourceEvent::Row(RowEvent {
        table: table.to_string(),
        op: RowOp::Update,
        before: Some(row(before)),
        after: Some(row(after)),
        src_ts_ms: now_ms(),
    })
}

pub fn delete_event(table: &str, before: Value) -> SourceEvent {
    SourceEvent::Row(RowEvent {
        table: table.to_string(),
        op: RowOp::Delete,
        before: Some(row(before)),
        after: None,
        src_ts_ms: now_ms(),
    })
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Poll the debounce heuristic until the connector's stats stop moving.
pub async fn wait_settled(control: &ControlPlane, name: &str) {
    for _ in 0..2500 {
        if control.settled(name) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("connector '{}' never settled", name);
}

/// Poll the state view until the connector reports the expected state.
pub async fn wait_state(control: &ControlPlane, name: &str, state: &str) {
    for _ in 0..2500 {
        let view = control.state_view().await;
        if view.iter().any(|r| r.name == name && r.state == state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let view = control.state_view().await;
    panic!(
        "connector '{}' never reached state '{}', view: {:?}",
        name, state, view
    );
}
