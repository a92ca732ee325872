//! Differential property tests for the SQLite adapter
//!
//! Runs random operation sequences against [`SqliteBackend`] and
//! [`MemoryBackend`] and requires identical observable behavior: stored rows,
//! insertion order, and the results of random queries. The driver assigns
//! explicit ids so both stores hold the same rows regardless of their id
//! generators.
//!
//! Generated data stays typed per field (names are strings, counts are
//! integers, ...). The JSON encoding's documented aliasing (null vs absent,
//! booleans as 1/0, composite text comparison) is out of scope here; those
//! corners have targeted tests next to the translation code.

use proptest::prelude::*;
use silo_api::{Constraints, Direction, Filter, Operator, Row, Value, ID_FIELD};

use crate::api::memory_backend::MemoryBackend;
use crate::api::repository::Repository;
use crate::storage::sqlite::SqliteBackend;

const TABLE: &str = "rows";

#[derive(Clone, Debug)]
enum Op {
    Create(Row),
    Update(prop::sample::Index, Row),
    Remove(prop::sample::Index),
    BulkCreate(Vec<Row>),
    BulkUpdate(Vec<(prop::sample::Index, Row)>),
    BulkRemove(Vec<prop::sample::Index>),
}

#[derive(Clone, Debug)]
struct Probe {
    constraints: Constraints,
    fields: Option<Vec<String>>,
}

fn arb_name() -> impl Strategy<Value = Value> + Clone {
    "[a-d]{1,4}".prop_map(Value::String)
}

fn arb_count() -> impl Strategy<Value = Value> + Clone {
    (-5i64..50).prop_map(Value::Integer)
}

// Halves only, so the value round-trips through JSON text exactly
fn arb_score() -> impl Strategy<Value = Value> + Clone {
    (-10i32..40).prop_map(|n| Value::Float(f64::from(n) / 2.0))
}

fn arb_active() -> impl Strategy<Value = Value> + Clone {
    any::<bool>().prop_map(Value::Boolean)
}

fn arb_tag() -> impl Strategy<Value = Value> + Clone {
    "[a-c]".prop_map(Value::String)
}

fn arb_tags() -> impl Strategy<Value = Value> + Clone {
    prop::collection::vec(arb_tag(), 0..3).prop_map(Value::Array)
}

fn assemble_row(
    name: Option<Value>,
    count: Option<Value>,
    score: Option<Value>,
    active: Option<Value>,
    tags: Option<Value>,
) -> Row {
    let mut row = Row::new();
    for (field, value) in [
        ("name", name),
        ("count", count),
        ("score", score),
        ("active", active),
        ("tags", tags),
    ] {
        if let Some(value) = value {
            row.insert(field.to_string(), value);
        }
    }
    row
}

fn arb_row() -> impl Strategy<Value = Row> {
    (
        prop::option::of(arb_name()),
        prop::option::of(arb_count()),
        prop::option::of(arb_score()),
        prop::option::of(arb_active()),
        prop::option::of(arb_tags()),
    )
        .prop_map(|(name, count, score, active, tags)| {
            assemble_row(name, count, score, active, tags)
        })
}

// Update payloads may also carry the delete sentinel per field
fn arb_patch() -> impl Strategy<Value = Row> {
    (
        prop::option::of(prop_oneof![4 => arb_name(), 1 => Just(Value::Delete)]),
        prop::option::of(prop_oneof![4 => arb_count(), 1 => Just(Value::Delete)]),
        prop::option::of(prop_oneof![4 => arb_score(), 1 => Just(Value::Delete)]),
        prop::option::of(prop_oneof![4 => arb_active(), 1 => Just(Value::Delete)]),
        prop::option::of(prop_oneof![4 => arb_tags(), 1 => Just(Value::Delete)]),
    )
        .prop_map(|(name, count, score, active, tags)| {
            assemble_row(name, count, score, active, tags)
        })
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => arb_row().prop_map(Op::Create),
        3 => (any::<prop::sample::Index>(), arb_patch())
            .prop_map(|(idx, patch)| Op::Update(idx, patch)),
        2 => any::<prop::sample::Index>().prop_map(Op::Remove),
        2 => prop::collection::vec(arb_row(), 0..4).prop_map(Op::BulkCreate),
        2 => prop::collection::vec((any::<prop::sample::Index>(), arb_patch()), 1..4)
            .prop_map(Op::BulkUpdate),
        2 => prop::collection::vec(any::<prop::sample::Index>(), 0..4)
            .prop_map(Op::BulkRemove),
    ]
}

fn arb_filter() -> impl Strategy<Value = Filter> {
    let ordered_ops = prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Lt),
        Just(Operator::Le),
        Just(Operator::Gt),
        Just(Operator::Ge),
    ];
    let membership_ops = prop_oneof![Just(Operator::In), Just(Operator::NotIn)];

    prop_oneof![
        (ordered_ops.clone(), arb_name()).prop_map(|(op, v)| Filter::new("name", op, v)),
        (ordered_ops.clone(), arb_count()).prop_map(|(op, v)| Filter::new("count", op, v)),
        (ordered_ops.clone(), arb_score()).prop_map(|(op, v)| Filter::new("score", op, v)),
        (ordered_ops, arb_active()).prop_map(|(op, v)| Filter::new("active", op, v)),
        (membership_ops.clone(), prop::collection::vec(arb_name(), 0..3))
            .prop_map(|(op, vs)| Filter::new("name", op, Value::Array(vs))),
        (membership_ops, prop::collection::vec(arb_count(), 0..3))
            .prop_map(|(op, vs)| Filter::new("count", op, Value::Array(vs))),
        arb_tag().prop_map(|v| Filter::new("tags", Operator::Contains, v)),
        prop::collection::vec(arb_tag(), 0..3)
            .prop_map(|vs| Filter::new("tags", Operator::ContainsAny, Value::Array(vs))),
    ]
}

fn arb_order() -> impl Strategy<Value = Vec<(String, Direction)>> {
    let key = (
        prop_oneof![
            Just("name"),
            Just("count"),
            Just("score"),
            Just("active"),
            Just(ID_FIELD),
        ],
        prop_oneof![Just(Direction::Asc), Just(Direction::Desc)],
    );
    prop::collection::vec(key, 0..3).prop_map(|keys| {
        keys.into_iter().map(|(f, d)| (f.to_string(), d)).collect()
    })
}

fn arb_probe() -> impl Strategy<Value = Probe> {
    (
        prop::collection::vec(arb_filter(), 0..3),
        arb_order(),
        prop::option::of(0usize..5),
        prop::option::of(Just(vec!["name".to_string(), "count".to_string()])),
    )
        .prop_map(|(filters, order_by, limit, fields)| Probe {
            constraints: Constraints {
                filters,
                order_by,
                limit,
            },
            fields,
        })
}

fn pick_id(ids: &[String], idx: &prop::sample::Index) -> String {
    if ids.is_empty() {
        "missing".to_string()
    } else {
        ids[idx.index(ids.len())].clone()
    }
}

async fn apply_ops(ops: &[Op]) -> (MemoryBackend, SqliteBackend, Vec<String>) {
    let memory = MemoryBackend::new();
    let sqlite = SqliteBackend::open_in_memory().unwrap();
    let mut ids: Vec<String> = Vec::new();
    let mut next = 0usize;

    for op in ops {
        match op {
            Op::Create(row) => {
                let id = format!("r{next}");
                next += 1;
                let m = memory
                    .create(TABLE, row.clone(), Some(id.clone()))
                    .await
                    .unwrap();
                let s = sqlite
                    .create(TABLE, row.clone(), Some(id.clone()))
                    .await
                    .unwrap();
                assert_eq!(m, s);
                ids.push(id);
            }
            Op::Update(idx, patch) => {
                let id = pick_id(&ids, idx);
                memory.update(TABLE, &id, patch.clone()).await.unwrap();
                sqlite.update(TABLE, &id, patch.clone()).await.unwrap();
            }
            Op::Remove(idx) => {
                let id = pick_id(&ids, idx);
                memory.remove(TABLE, &id).await.unwrap();
                sqlite.remove(TABLE, &id).await.unwrap();
            }
            Op::BulkCreate(rows) => {
                let mut with_ids = Vec::with_capacity(rows.len());
                for row in rows {
                    let id = format!("r{next}");
                    next += 1;
                    let mut row = row.clone();
                    row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    with_ids.push(row);
                    ids.push(id);
                }
                let m = memory.bulk_create(TABLE, with_ids.clone()).await.unwrap();
                let s = sqlite.bulk_create(TABLE, with_ids).await.unwrap();
                assert_eq!(m, s);
            }
            Op::BulkUpdate(pairs) => {
                let rows: Vec<Row> = pairs
                    .iter()
                    .map(|(idx, patch)| {
                        let mut row = patch.clone();
                        row.insert(ID_FIELD.to_string(), Value::String(pick_id(&ids, idx)));
                        row
                    })
                    .collect();
                memory.bulk_update(TABLE, rows.clone()).await.unwrap();
                sqlite.bulk_update(TABLE, rows).await.unwrap();
            }
            Op::BulkRemove(idxs) => {
                let targets: Vec<String> = idxs.iter().map(|idx| pick_id(&ids, idx)).collect();
                memory.bulk_remove(TABLE, targets.clone()).await.unwrap();
                sqlite.bulk_remove(TABLE, targets).await.unwrap();
            }
        }
    }

    (memory, sqlite, ids)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn backends_agree_on_random_histories(
        ops in prop::collection::vec(arb_op(), 0..20),
        probes in prop::collection::vec(arb_probe(), 0..6),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (memory, sqlite, ids) = apply_ops(&ops).await;

            // Every row, in insertion order
            let m = memory.query(TABLE, Constraints::new(), None).await.unwrap();
            let s = sqlite.query(TABLE, Constraints::new(), None).await.unwrap();
            assert_eq!(m, s, "full scans diverged");

            let mc = memory.query_count(TABLE, Constraints::new()).await.unwrap();
            let sc = sqlite.query_count(TABLE, Constraints::new()).await.unwrap();
            assert_eq!(mc, sc, "counts diverged");
            assert_eq!(mc, m.len());

            for id in &ids {
                let m = memory.find(TABLE, id).await.unwrap();
                let s = sqlite.find(TABLE, id).await.unwrap();
                assert_eq!(m, s, "find diverged for id {id}");
            }

            for probe in &probes {
                let m = memory
                    .query(TABLE, probe.constraints.clone(), probe.fields.clone())
                    .await
                    .unwrap();
                let s = sqlite
                    .query(TABLE, probe.constraints.clone(), probe.fields.clone())
                    .await
                    .unwrap();
                assert_eq!(m, s, "query diverged for {probe:?}");

                let mc = memory
                    .query_count(TABLE, probe.constraints.clone())
                    .await
                    .unwrap();
                let sc = sqlite
                    .query_count(TABLE, probe.constraints.clone())
                    .await
                    .unwrap();
                assert_eq!(mc, sc, "count diverged for {probe:?}");

                // Counting ignores order_by and limit, so compare against
                // the uncapped fetch
                let mut uncapped = probe.constraints.clone();
                uncapped.limit = None;
                let full = memory.query(TABLE, uncapped, None).await.unwrap();
                assert_eq!(mc, full.len(), "count disagrees with query for {probe:?}");
            }
        });
    }
}
