use std::sync::Arc;

use serde_json::json;
use shardwork_application::{DocumentStore, LeaseManager};
use shardwork_core::{AppError, HolderId};
use shardwork_domain::{Filter, FilterTemplate, Update};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::PostgresDocumentStore;

async fn test_store() -> Option<PostgresDocumentStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool: PgPool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    let store = PostgresDocumentStore::new(pool);
    if let Err(error) = store.migrate().await {
        panic!("failed to run migrations for postgres document store tests: {error}");
    }

    Some(store)
}

fn unique_collection(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
async fn insert_rejects_duplicate_keys() {
    let Some(store) = test_store().await else {
        return;
    };
    let collection = unique_collection("leases");

    let first = store
        .insert_one(&collection, json!({ "_id": "task/task:0", "etag": 0 }))
        .await;
    assert!(first.is_ok());

    let second = store
        .insert_one(&collection, json!({ "_id": "task/task:0", "etag": 7 }))
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn range_scan_follows_key_order_and_filters() {
    let Some(store) = test_store().await else {
        return;
    };
    let collection = unique_collection("orders");

    for id in [12_i64, 3, 7, 1, 30, 18] {
        let region = if id % 2 == 0 { "eu" } else { "us" };
        let inserted = store
            .insert_one(&collection, json!({ "_id": id, "region": region }))
            .await;
        assert!(inserted.is_ok());
    }
    assert!(store.insert_one(&collection, json!({ "_id": "z", "region": "eu" })).await.is_ok());

    let template = FilterTemplate::keyset().eq("region", "eu");
    let first_page = store
        .find_range(&collection, &template.bind(None), 2)
        .await
        .unwrap_or_default();
    let keys: Vec<_> = first_page.iter().map(|document| document["_id"].clone()).collect();
    assert_eq!(keys, vec![json!(12), json!(18)]);

    let resumed = store
        .find_range(
            &collection,
            &template.bind(Some(&shardwork_domain::DocumentKey::Int(18))),
            10,
        )
        .await
        .unwrap_or_default();
    let keys: Vec<_> = resumed.iter().map(|document| document["_id"].clone()).collect();
    assert_eq!(keys, vec![json!(30), json!("z")]);
}

#[tokio::test]
async fn conditional_update_matches_only_current_version() {
    let Some(store) = test_store().await else {
        return;
    };
    let collection = unique_collection("leases");
    assert!(
        store
            .insert_one(&collection, json!({ "_id": "a", "etag": 1, "data": {} }))
            .await
            .is_ok()
    );

    let update = Update::new().inc("etag", 1).set("data.resume_id", 42);
    let stale = store
        .update_one(&collection, &Filter::new().eq("_id", "a").eq("etag", 0), &update)
        .await;
    assert!(matches!(stale, Ok(0)));

    let current = store
        .update_one(&collection, &Filter::new().eq("_id", "a").eq("etag", 1), &update)
        .await;
    assert!(matches!(current, Ok(1)));

    let stored = store
        .find_one(&collection, &Filter::new().eq("_id", "a"))
        .await
        .ok()
        .flatten()
        .unwrap_or_default();
    assert_eq!(stored["etag"], json!(2));
    assert_eq!(stored["data"]["resume_id"], json!(42));
}

#[tokio::test]
async fn concurrent_lease_acquisition_has_one_winner() {
    let Some(store) = test_store().await else {
        return;
    };
    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let collection = unique_collection("leases");

    let mut attempts = tokio::task::JoinSet::new();
    for index in 0..6 {
        let manager = LeaseManager::new(
            store.clone(),
            collection.clone(),
            HolderId::new(format!("worker-{index}")).unwrap_or_else(|_| unreachable!()),
            30,
        );
        attempts.spawn(async move {
            manager
                .acquire("task", "task:0", false)
                .await
                .ok()
                .flatten()
                .is_some()
        });
    }

    let mut winners = 0;
    while let Some(acquired) = attempts.join_next().await {
        if acquired.unwrap_or(false) {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
