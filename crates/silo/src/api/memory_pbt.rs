//! Property tests for the in-memory id generator
//!
//! Random interleavings of explicit-id and generated-id creates, spread over
//! several tables, must never produce a duplicate generated id or land a
//! generated id on an existing row. Explicit ids come from a small numeric
//! pool that overlaps the counter's range on purpose, so the generator has to
//! skip claimed ids to hold the invariant.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use silo_api::{Constraints, Row};

use super::memory_backend::MemoryBackend;
use super::repository::Repository;

#[derive(Clone, Debug)]
struct CreateOp {
    table: &'static str,
    explicit: Option<String>,
}

fn arb_create() -> impl Strategy<Value = CreateOp> {
    (
        prop_oneof![Just("notes"), Just("tags"), Just("links")],
        prop::option::of("[0-9]{1,2}"),
    )
        .prop_map(|(table, explicit)| CreateOp { table, explicit })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn generated_ids_never_collide(ops in prop::collection::vec(arb_create(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let backend = MemoryBackend::new();
            let mut generated: HashSet<String> = HashSet::new();
            let mut per_table: HashMap<&str, HashSet<String>> = HashMap::new();

            for op in &ops {
                let id = backend
                    .create(op.table, Row::new(), op.explicit.clone())
                    .await
                    .unwrap();
                let table_ids = per_table.entry(op.table).or_default();

                match &op.explicit {
                    Some(explicit) => {
                        assert_eq!(&id, explicit, "explicit id was not honored");
                        table_ids.insert(id.clone());
                    }
                    None => {
                        assert!(generated.insert(id.clone()), "generated id {id} repeated");
                        assert!(
                            table_ids.insert(id.clone()),
                            "generated id {id} clobbered a row in {}",
                            op.table
                        );
                    }
                }
                assert!(backend.find(op.table, &id).await.unwrap().is_some());
            }

            // Every table holds exactly the ids we put there
            for (table, table_ids) in &per_table {
                let count = backend.query_count(table, Constraints::new()).await.unwrap();
                assert_eq!(count, table_ids.len(), "row count for {table}");
            }
        });
    }
}
