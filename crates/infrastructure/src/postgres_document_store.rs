use async_trait::async_trait;
use serde_json::Value;
use shardwork_application::DocumentStore;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{DocumentKey, Filter, Update};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

mod filter_sql;

use filter_sql::push_filter;

const ORDER_BY_KEY: &str = " ORDER BY key_int ASC NULLS LAST, key_text ASC";

/// PostgreSQL-backed document store.
///
/// Every collection lives in one `documents` table with a JSONB body.
/// Filters run as JSONB predicates and range scans follow the key order
/// (integers first, then strings byte-wise).
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a document store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| AppError::Store(format!("failed to run document migrations: {error}")))
    }
}

fn select_documents(collection: &str, filter: &Filter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT body FROM documents WHERE collection = ");
    builder.push_bind(collection.to_owned());
    push_filter(&mut builder, filter);
    builder.push(ORDER_BY_KEY);
    builder
}

fn document_key(collection: &str, document: &Value) -> AppResult<DocumentKey> {
    DocumentKey::of_document(document).ok_or_else(|| {
        AppError::Validation(format!(
            "document in collection '{collection}' needs an integer or string _id"
        ))
    })
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Value>> {
        let mut builder = select_documents(collection, filter);
        builder.push(" LIMIT 1");

        builder
            .build_query_scalar::<Value>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to find document in collection '{collection}': {error}"
                ))
            })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> AppResult<u64> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Store(format!("failed to start document update transaction: {error}"))
        })?;

        // FOR UPDATE re-checks the filter against the latest row version once
        // a concurrent writer commits, so the match and the write are atomic.
        let mut builder = select_documents(collection, filter);
        builder.push(" LIMIT 1 FOR UPDATE");
        let current = builder
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to lock document in collection '{collection}': {error}"
                ))
            })?;

        let Some(mut document) = current else {
            return Ok(0);
        };
        let key = document_key(collection, &document)?;
        update.apply(&mut document)?;

        sqlx::query(
            r#"
            UPDATE documents
            SET body = $3, updated_at = now()
            WHERE collection = $1 AND doc_key = $2
            "#,
        )
        .bind(collection)
        .bind(key.to_value())
        .bind(&document)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to update document '{key}' in collection '{collection}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Store(format!("failed to commit document update: {error}"))
        })?;

        debug!(collection, key = %key, "document updated");
        Ok(1)
    }

    async fn insert_one(&self, collection: &str, document: Value) -> AppResult<()> {
        let key = document_key(collection, &document)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (collection, doc_key, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, doc_key) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(key.to_value())
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Store(format!(
                "failed to insert document '{key}' into collection '{collection}': {error}"
            ))
        })?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "document '{key}' already exists in collection '{collection}'"
            )));
        }

        Ok(())
    }

    async fn find_range(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> AppResult<Vec<Value>> {
        let limit = i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid document range limit: {error}"))
        })?;

        let mut builder = select_documents(collection, filter);
        builder.push(" LIMIT ");
        builder.push_bind(limit);

        builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Store(format!(
                    "failed to scan documents in collection '{collection}': {error}"
                ))
            })
    }
}

#[cfg(test)]
mod tests;
