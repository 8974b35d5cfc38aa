use serde_json::json;
use shardwork_application::DocumentStore;
use shardwork_core::AppError;
use shardwork_domain::{Filter, Update};

use super::InMemoryDocumentStore;

#[tokio::test]
async fn duplicate_keys_are_rejected() {
    let store = InMemoryDocumentStore::new();

    let first = store.insert_one("leases", json!({ "_id": "task/task:0" })).await;
    assert!(first.is_ok());

    let second = store
        .insert_one("leases", json!({ "_id": "task/task:0", "etag": 4 }))
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));
    assert_eq!(store.count("leases").await, 1);
}

#[tokio::test]
async fn documents_without_usable_key_are_rejected() {
    let store = InMemoryDocumentStore::new();

    let missing = store.insert_one("orders", json!({ "region": "eu" })).await;
    let float = store.insert_one("orders", json!({ "_id": 1.5 })).await;

    assert!(matches!(missing, Err(AppError::Validation(_))));
    assert!(matches!(float, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn range_is_ordered_by_key_with_integers_first() {
    let store = InMemoryDocumentStore::new();
    let upserted = store
        .upsert_many(
            "orders",
            vec![
                json!({ "_id": "b" }),
                json!({ "_id": 10 }),
                json!({ "_id": "a" }),
                json!({ "_id": 2 }),
            ],
        )
        .await;
    assert!(upserted.is_ok());

    let page = store
        .find_range("orders", &Filter::new(), 3)
        .await
        .unwrap_or_default();
    let keys: Vec<_> = page.iter().map(|document| document["_id"].clone()).collect();
    assert_eq!(keys, vec![json!(2), json!(10), json!("a")]);

    let after = store
        .find_range("orders", &Filter::new().gt("_id", 10), 10)
        .await
        .unwrap_or_default();
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn update_applies_only_when_the_filter_matches() {
    let store = InMemoryDocumentStore::new();
    assert!(
        store
            .insert_one("leases", json!({ "_id": "a", "etag": 1, "status": "leased" }))
            .await
            .is_ok()
    );

    let update = Update::new().set("status", "available").inc("etag", 1);
    let stale = store
        .update_one("leases", &Filter::new().eq("_id", "a").eq("etag", 0), &update)
        .await;
    assert!(matches!(stale, Ok(0)));

    let current = store
        .update_one("leases", &Filter::new().eq("_id", "a").eq("etag", 1), &update)
        .await;
    assert!(matches!(current, Ok(1)));

    let stored = store
        .find_one("leases", &Filter::new().eq("_id", "a"))
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    assert_eq!(stored["etag"], json!(2));
    assert_eq!(stored["status"], json!("available"));
}

#[tokio::test]
async fn rejected_update_leaves_document_untouched() {
    let store = InMemoryDocumentStore::new();
    assert!(
        store
            .insert_one("orders", json!({ "_id": 1, "total": 3 }))
            .await
            .is_ok()
    );

    let result = store
        .update_one(
            "orders",
            &Filter::new().eq("_id", 1),
            &Update::new().inc("total", 1).set("_id", 2),
        )
        .await;
    assert!(result.is_err());

    let stored = store
        .find_one("orders", &Filter::new().eq("_id", 1))
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    assert_eq!(stored["total"], json!(3));
}
