//! Builder and ingest scenarios against an assembled engine.

use deckpool::api::{
    self, AllocateRequest, GenerateSetsRequest, IngestRequest, MergeRequest, RawItem,
};
use deckpool::builder::CategoryBuildOutcome;
use deckpool::core::ManualClock;
use deckpool::config::Config;
use deckpool::{CategoryId, Engine, ItemId};
use serde_json::json;

const T0: u64 = 1_784_118_600_000;

fn cat(s: &str) -> CategoryId {
    CategoryId::parse(s).unwrap()
}

fn engine_with(categories: &[&str]) -> Engine {
    let mut config = Config::default();
    for id in categories {
        config.categories.insert(id.to_string(), id.to_string());
    }
    Engine::new(&config, ManualClock::at(T0)).unwrap()
}

fn seed(engine: &Engine, category: &str, ids: &[&str]) {
    let request = IngestRequest {
        items: ids
            .iter()
            .map(|id| RawItem {
                id: id.to_string(),
                category_id: category.to_string(),
                payload: json!({"q": format!("question {id}")}),
            })
            .collect(),
    };
    api::ingest(engine, request).unwrap();
}

#[test]
fn partitions_fourteen_items_into_two_sets_of_five() {
    let engine = engine_with(&["cat-x"]);
    let ids: Vec<String> = (1..=14).map(|i| format!("i{i:02}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    seed(&engine, "cat-x", &id_refs);

    let (accepted, report) = api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 3,
            items_per_set: 5,
        },
    )
    .unwrap();
    assert!(accepted.accepted);

    match report.per_category.get(&cat("cat-x")).unwrap() {
        CategoryBuildOutcome::Built {
            sets,
            items_consumed,
            watermark,
            ..
        } => {
            assert_eq!(*sets, 2);
            assert_eq!(*items_consumed, 10);
            assert_eq!(watermark, &ItemId::parse("i10").unwrap());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(engine.pool_metadata(&cat("cat-x")).unwrap().available, 2);

    // i11..i14 remain for the next run: with one more item a third set
    // appears and the watermark advances.
    seed(&engine, "cat-x", &["i15"]);
    let (_, report) = api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 3,
            items_per_set: 5,
        },
    )
    .unwrap();
    assert!(matches!(
        report.per_category.get(&cat("cat-x")).unwrap(),
        CategoryBuildOutcome::Built { sets: 1, .. }
    ));
    assert_eq!(engine.pool_metadata(&cat("cat-x")).unwrap().available, 3);
}

#[test]
fn builder_shortfall_does_not_fail_the_run() {
    let engine = engine_with(&["cat-thin", "cat-rich"]);
    seed(&engine, "cat-thin", &["a1"]);
    seed(&engine, "cat-rich", &["b1", "b2", "b3", "b4"]);

    let (_, report) = api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 2,
            items_per_set: 2,
        },
    )
    .unwrap();

    assert!(matches!(
        report.per_category.get(&cat("cat-thin")).unwrap(),
        CategoryBuildOutcome::Shortfall {
            available: 1,
            items_per_set: 2
        }
    ));
    assert!(matches!(
        report.per_category.get(&cat("cat-rich")).unwrap(),
        CategoryBuildOutcome::Built { sets: 2, .. }
    ));
}

#[test]
fn duplicate_hash_items_never_reach_sets() {
    let engine = engine_with(&["cat-x"]);
    // Two items with identical payloads: one survives ingest.
    let request = IngestRequest {
        items: vec![
            RawItem {
                id: "i1".into(),
                category_id: "cat-x".into(),
                payload: json!({"q": "duplicated"}),
            },
            RawItem {
                id: "i2".into(),
                category_id: "cat-x".into(),
                payload: json!({"q": "duplicated"}),
            },
            RawItem {
                id: "i3".into(),
                category_id: "cat-x".into(),
                payload: json!({"q": "unique"}),
            },
        ],
    };
    let report = api::ingest(&engine, request).unwrap();
    assert_eq!(report.stored, 2);
    assert_eq!(report.skipped_duplicate_by_hash, 1);

    let (_, build) = api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 1,
            items_per_set: 2,
        },
    )
    .unwrap();
    match build.per_category.get(&cat("cat-x")).unwrap() {
        CategoryBuildOutcome::Built { items_consumed, .. } => assert_eq!(*items_consumed, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn legacy_payload_fields_are_normalized_at_ingest() {
    let engine = engine_with(&["cat-x"]);
    let report = api::ingest(
        &engine,
        IngestRequest {
            items: vec![
                RawItem {
                    id: "i1".into(),
                    category_id: "cat-x".into(),
                    payload: json!({"q": "pick one", "correct-answer-idx": 2}),
                },
                // Same content under the canonical field name: a duplicate.
                RawItem {
                    id: "i2".into(),
                    category_id: "cat-x".into(),
                    payload: json!({"q": "pick one", "correct-answer-index": 2}),
                },
            ],
        },
    )
    .unwrap();
    assert_eq!(report.stored, 1);
    assert_eq!(report.skipped_duplicate_by_hash, 1);
}

#[test]
fn merge_returns_materialized_items_per_category() {
    let engine = engine_with(&["cat-x"]);
    seed(&engine, "cat-x", &["i1", "i2", "i3", "i4"]);
    api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 2,
            items_per_set: 2,
        },
    )
    .unwrap();

    let response = api::merge(
        &engine,
        MergeRequest {
            user_id: "u".into(),
            category_ids: vec!["cat-x".into()],
        },
    )
    .unwrap();

    let merged = response.categories.get(&cat("cat-x")).expect("merged");
    assert_eq!(merged.item_count, 2);
    assert_eq!(merged.items.len(), 2);
    assert_eq!(response.all_items.len(), 2);
    assert!(response.failed.is_empty());
}

#[test]
fn allocation_flow_spans_build_and_drain() {
    let engine = engine_with(&["cat-x"]);
    seed(&engine, "cat-x", &["i1", "i2", "i3", "i4", "i5", "i6"]);
    api::generate_sets(
        &engine,
        GenerateSetsRequest {
            num_sets_per_category: 3,
            items_per_set: 2,
        },
    )
    .unwrap();

    let first = api::allocate(
        &engine,
        AllocateRequest {
            user_id: "u".into(),
            category_ids: vec!["cat-x".into()],
        },
    )
    .unwrap();
    let drawn = first.successful.get(&cat("cat-x")).cloned().expect("drawn");

    // Draining the head removes what u already drew; v still gets the
    // next offerable set and the pool shrinks for everyone.
    let drained = engine.drain_one(&cat("cat-x")).unwrap();
    assert_eq!(drained, Some(drawn));
    assert_eq!(engine.pool_metadata(&cat("cat-x")).unwrap().available, 2);

    let second = api::allocate(
        &engine,
        AllocateRequest {
            user_id: "v".into(),
            category_ids: vec!["cat-x".into()],
        },
    )
    .unwrap();
    assert_eq!(second.summary.successful, 1);
}
