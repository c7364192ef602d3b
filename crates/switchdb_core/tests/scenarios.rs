//! End-to-end exercises over a two-table Parent/Child database: placeholder
//! chaining, garbage collection, weak-reference cleanup, predicate-driven
//! mutation, no-op updates, and monitor dialect parity.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::time::Duration;
use switchdb_core::{
    model, Api, Cache, DatabaseModel, Event, EventKind, EventProcessor, Registry,
};
use switchdb_protocol::{
    expand_named_uuids, Operation, TableUpdates, TableUpdates2, UpdateBatch,
};
use switchdb_schema::{DatabaseSchema, Mutator};
use uuid::Uuid;

model! {
    pub struct Parent("Parent") {
        #[column("_uuid")]
        pub uuid: String,
        #[column("name")]
        pub name: String,
        #[column("children")]
        pub children: Vec<String>,
        #[column("backup")]
        pub backup: Option<String>,
        #[column("extras")]
        pub extras: BTreeMap<String, String>,
    }
}

model! {
    pub struct Child("Child") {
        #[column("_uuid")]
        pub uuid: String,
        #[column("name")]
        pub name: String,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn database_model() -> DatabaseModel {
    init_tracing();
    let schema = DatabaseSchema::parse(
        r#"{
            "name": "TestDb",
            "version": "1.0.0",
            "tables": {
                "Parent": {
                    "columns": {
                        "name": {"type": "string"},
                        "children": {"type": {
                            "key": {"type": "uuid", "refTable": "Child"},
                            "min": 0, "max": "unlimited"
                        }},
                        "backup": {"type": {
                            "key": {"type": "uuid", "refTable": "Child",
                                    "refType": "weak"},
                            "min": 0, "max": 1
                        }},
                        "extras": {"type": {
                            "key": "string", "value": "string",
                            "min": 0, "max": "unlimited"
                        }}
                    },
                    "indexes": [["name"]],
                    "isRoot": true
                },
                "Child": {
                    "columns": {"name": {"type": "string"}}
                }
            }
        }"#,
    )
    .unwrap();
    let mut registry = Registry::new();
    registry.register::<Parent>().unwrap();
    registry.register::<Child>().unwrap();
    DatabaseModel::new(schema, registry).unwrap()
}

/// A cache whose events land on a channel as (kind, table, uuid) triples.
fn observed_cache() -> (Cache, EventProcessor, mpsc::Receiver<(EventKind, String, Uuid)>) {
    let processor = EventProcessor::new(64);
    let (tx, rx) = mpsc::channel();
    processor.add_handler(Box::new(move |event: &Event| {
        tx.send((event.kind, event.table.clone(), event.uuid)).ok();
    }));
    let cache = Cache::new(database_model(), processor.sink()).unwrap();
    (cache, processor, rx)
}

fn classic(tables: serde_json::Value) -> UpdateBatch {
    let parsed: TableUpdates = serde_json::from_value(tables).unwrap();
    UpdateBatch::Classic(parsed)
}

fn differential(tables: serde_json::Value) -> UpdateBatch {
    let parsed: TableUpdates2 = serde_json::from_value(tables).unwrap();
    UpdateBatch::Differential(parsed)
}

fn drain(rx: &mpsc::Receiver<(EventKind, String, Uuid)>, n: usize) -> Vec<(EventKind, String, Uuid)> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    out
}

#[test]
fn named_uuid_chaining_lands_in_the_cache() {
    let cache = Cache::new(database_model(), None).unwrap();
    let api = Api::new(&cache);

    let child = Child {
        uuid: "c1".into(),
        name: "c".into(),
    };
    let parent = Parent {
        name: "p".into(),
        children: vec!["c1".into()],
        ..Default::default()
    };
    let mut ops = api.create(&[child])
        .unwrap()
        .into_iter()
        .chain(api.create(&[parent]).unwrap())
        .collect::<Vec<_>>();

    let bindings = expand_named_uuids(&mut ops).unwrap();
    let c = bindings["c1"];

    // The child insert is pinned to the allocated identifier and the
    // parent's reference is rewritten to the tagged concrete form.
    match &ops[0] {
        Operation::Insert { uuid, uuid_name, .. } => {
            assert_eq!(*uuid, Some(c));
            assert!(uuid_name.is_none() || uuid_name.as_deref() == Some("c1"));
        }
        other => panic!("expected insert, got {other:?}"),
    }
    match &ops[1] {
        Operation::Insert { row, .. } => {
            assert_eq!(row["children"], json!(["uuid", c.to_string()]));
        }
        other => panic!("expected insert, got {other:?}"),
    }

    // The monitor echoes the transaction; the cache links parent to child.
    let p = Uuid::new_v4();
    cache
        .apply_updates(&classic(json!({
            "Child": { c.to_string(): {"new": {"name": "c"}} },
            "Parent": { p.to_string(): {"new": {
                "name": "p",
                "children": ["uuid", c.to_string()]
            }} }
        })))
        .unwrap();

    let row = cache.row("Parent", p).unwrap().unwrap();
    let cached = row.as_any().downcast_ref::<Parent>().unwrap();
    assert_eq!(cached.children, vec![c.to_string()]);
    assert!(cache.row("Child", c).unwrap().is_some());
}

#[test]
fn strong_reference_gc_emits_one_child_delete() {
    let (cache, _processor, rx) = observed_cache();
    let p = Uuid::new_v4();
    let c = Uuid::new_v4();
    cache
        .apply_updates(&classic(json!({
            "Child": { c.to_string(): {"new": {"name": "c"}} },
            "Parent": { p.to_string(): {"new": {
                "name": "p",
                "children": ["uuid", c.to_string()]
            }} }
        })))
        .unwrap();
    drain(&rx, 2);

    cache
        .apply_updates(&classic(json!({
            "Parent": { p.to_string(): {
                "old": {"children": ["uuid", c.to_string()]},
                "new": {"name": "p", "children": ["set", []]}
            } }
        })))
        .unwrap();

    let mut events = drain(&rx, 2);
    events.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(events[0], (EventKind::Delete, "Child".to_string(), c));
    assert_eq!(events[1].0, EventKind::Update);
    assert!(cache.row("Child", c).unwrap().is_none());
}

#[test]
fn weak_reference_cleanup_updates_the_referrer() {
    let (cache, _processor, rx) = observed_cache();
    let p = Uuid::new_v4();
    let keeper = Uuid::new_v4();
    let c = Uuid::new_v4();
    cache
        .apply_updates(&classic(json!({
            "Child": { c.to_string(): {"new": {"name": "c"}} },
            "Parent": {
                p.to_string(): {"new": {
                    "name": "p", "backup": ["uuid", c.to_string()]
                }},
                keeper.to_string(): {"new": {
                    "name": "keeper", "children": ["uuid", c.to_string()]
                }}
            }
        })))
        .unwrap();
    drain(&rx, 3);

    cache
        .apply_updates(&classic(json!({
            "Parent": { keeper.to_string(): {
                "old": {"children": ["uuid", c.to_string()]},
                "new": {"name": "keeper", "children": ["set", []]}
            } }
        })))
        .unwrap();

    // Child delete plus updates on both parents, one of them the weak
    // cleanup.
    let events = drain(&rx, 3);
    assert!(events.contains(&(EventKind::Delete, "Child".to_string(), c)));
    assert!(events.contains(&(EventKind::Update, "Parent".to_string(), p)));

    let row = cache.row("Parent", p).unwrap().unwrap();
    let parent = row.as_any().downcast_ref::<Parent>().unwrap();
    assert_eq!(parent.backup, None);
}

#[test]
fn predicate_mutation_emits_the_expected_wire() {
    let cache = Cache::new(database_model(), None).unwrap();
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    cache
        .apply_updates(&classic(json!({
            "Parent": {
                p1.to_string(): {"new": {"name": "p1",
                    "extras": ["map", [["team", "a"]]]}},
                p2.to_string(): {"new": {"name": "p2",
                    "extras": ["map", [["team", "b"]]]}}
            }
        })))
        .unwrap();

    let api = Api::new(&cache);
    let cond = api
        .where_cache(|p: &Parent| p.extras.get("team").is_some_and(|t| t == "a"))
        .unwrap();
    let ops = cond
        .mutate(&[(
            "extras",
            Mutator::Insert,
            switchdb_core::Datum::Map(vec![(
                switchdb_core::Atom::from("role"),
                switchdb_core::Atom::from("x"),
            )]),
        )])
        .unwrap();

    assert_eq!(ops.len(), 1);
    let wire = serde_json::to_value(&ops[0]).unwrap();
    assert_eq!(
        wire,
        json!({
            "op": "mutate",
            "table": "Parent",
            "where": [["_uuid", "==", ["uuid", p1.to_string()]]],
            "mutations": [["extras", "insert", ["map", [["role", "x"]]]]]
        })
    );
}

#[test]
fn noop_update_emits_no_events() {
    let (cache, processor, rx) = observed_cache();
    let p = Uuid::new_v4();
    cache
        .apply_updates(&differential(json!({
            "Parent": { p.to_string(): {"insert": {"name": "p"}} }
        })))
        .unwrap();
    drain(&rx, 1);

    // An explicit-column update that writes the existing value comes back
    // from the monitor as an empty modify.
    let api = Api::new(&cache);
    let mut proto = Parent {
        name: "p".into(),
        ..Default::default()
    };
    api.get(&mut proto).unwrap();
    let cond = api.where_model(&proto, Vec::new()).unwrap();
    let ops = cond.update(&proto, Some(&["name"])).unwrap();
    match &ops[0] {
        Operation::Update { row, .. } => assert_eq!(row["name"], json!("p")),
        other => panic!("expected update, got {other:?}"),
    }

    cache
        .apply_updates(&differential(json!({
            "Parent": { p.to_string(): {"modify": {}} }
        })))
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(processor.dropped(), 0);
}

#[test]
fn dialects_converge_to_the_same_state_and_events() {
    let run = |batches: Vec<UpdateBatch>| {
        let (cache, _processor, rx) = observed_cache();
        let mut events = Vec::new();
        for batch in &batches {
            cache.apply_updates(batch).unwrap();
        }
        while let Ok(event) = rx.recv_timeout(Duration::from_millis(500)) {
            events.push(event);
        }
        let parents = cache.rows("Parent").unwrap();
        let children = cache.rows("Child").unwrap();
        (events, parents, children, cache)
    };

    let p = Uuid::new_v4();
    let c = Uuid::new_v4();

    let classic_feed = vec![
        classic(json!({
            "Child": { c.to_string(): {"new": {"name": "c"}} },
            "Parent": { p.to_string(): {"new": {
                "name": "p", "children": ["uuid", c.to_string()]
            }} }
        })),
        classic(json!({
            "Parent": { p.to_string(): {
                "old": {"name": "p"},
                "new": {"name": "q", "children": ["uuid", c.to_string()]}
            } }
        })),
        classic(json!({
            "Parent": { p.to_string(): {
                "old": {"children": ["uuid", c.to_string()]},
                "new": {"name": "q", "children": ["set", []]}
            } }
        })),
    ];

    let differential_feed = vec![
        differential(json!({
            "Child": { c.to_string(): {"insert": {"name": "c"}} },
            "Parent": { p.to_string(): {"insert": {
                "name": "p", "children": ["uuid", c.to_string()]
            }} }
        })),
        differential(json!({
            "Parent": { p.to_string(): {"modify": {"name": "q"}} }
        })),
        differential(json!({
            "Parent": { p.to_string(): {"modify": {
                "children": ["uuid", c.to_string()]
            }} }
        })),
    ];

    let (classic_events, classic_parents, classic_children, classic_cache) = run(classic_feed);
    let (diff_events, diff_parents, diff_children, diff_cache) = run(differential_feed);

    assert_eq!(classic_events, diff_events);
    assert_eq!(classic_parents, diff_parents);
    assert_eq!(classic_children, diff_children);

    let classic_row = classic_cache.row("Parent", p).unwrap().unwrap();
    let diff_row = diff_cache.row("Parent", p).unwrap().unwrap();
    assert_eq!(
        classic_row.as_any().downcast_ref::<Parent>(),
        diff_row.as_any().downcast_ref::<Parent>()
    );
}

#[test]
fn event_queue_backpressure_is_accounted() {
    let processor = EventProcessor::new(4);
    let (hold_tx, hold_rx) = mpsc::channel::<()>();
    processor.add_handler(Box::new(move |_: &Event| {
        hold_rx.recv().ok();
    }));

    let sink = processor.sink().unwrap();
    let burst = 16u64;
    for _ in 0..burst {
        sink.post(Event {
            kind: EventKind::Add,
            table: "Parent".into(),
            uuid: Uuid::new_v4(),
            old: None,
            new: None,
        });
    }
    // Queue capacity 4 plus at most one event in flight in the handler.
    assert!(processor.dropped() >= burst - 5);

    for _ in 0..burst {
        hold_tx.send(()).ok();
    }
}
