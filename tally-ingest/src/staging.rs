//! Staged bulk load of successful rows into the canonical item store
//!
//! Runs once per job, after every row is classified, inside a single
//! transaction: temp staging table → chunked bulk insert → one upsert
//! statement → commit. Any failure rolls back the entire batch; triage
//! rows are written elsewhere and are unaffected.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tally_common::db::EMBEDDING_DIMS;
use tally_common::Result;
use tracing::warn;
use uuid::Uuid;

/// Keeps each insert statement well under SQLite's bind-variable limit
const STAGING_CHUNK_ROWS: usize = 500;

/// One successful row, ready for the canonical store
#[derive(Debug, Clone)]
pub struct StagedItem {
    pub item_type: String,
    pub scope: String,
    pub business_key: String,
    pub custom_properties: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

/// Bulk-load a batch of staged items and upsert them into `items`.
///
/// On key conflict the new row's scope, status, and embedding win and
/// `custom_properties` is merged via `json_patch`: new keys win, old keys
/// absent from the new payload are preserved. Returns the number of rows
/// inserted or updated.
pub async fn load_items(pool: &SqlitePool, items: &[StagedItem]) -> Result<u64> {
    if items.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;

    // Temp tables are connection-scoped and pooled connections are reused
    sqlx::query("DROP TABLE IF EXISTS temp.items_staging")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        CREATE TEMP TABLE items_staging (
            guid TEXT NOT NULL,
            item_type TEXT NOT NULL,
            business_key TEXT NOT NULL,
            scope TEXT,
            status TEXT NOT NULL,
            custom_properties TEXT NOT NULL,
            embedding TEXT
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    for chunk in items.chunks(STAGING_CHUNK_ROWS) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO items_staging \
             (guid, item_type, business_key, scope, status, custom_properties, embedding) ",
        );
        builder.push_values(chunk, |mut b, item| {
            b.push_bind(Uuid::new_v4().to_string())
                .push_bind(&item.item_type)
                .push_bind(&item.business_key)
                .push_bind(&item.scope)
                .push_bind("active")
                .push_bind(item.custom_properties.to_string())
                .push_bind(encode_embedding(item));
        });
        builder.build().execute(&mut *tx).await?;
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO items
            (guid, item_type, business_key, scope, status, custom_properties,
             embedding, created_at, updated_at)
        SELECT guid, item_type, business_key, scope, status, custom_properties,
               embedding, ?1, ?2
        FROM items_staging
        WHERE true
        ON CONFLICT (item_type, business_key) DO UPDATE SET
            scope = excluded.scope,
            status = excluded.status,
            embedding = excluded.embedding,
            custom_properties = json_patch(items.custom_properties, excluded.custom_properties),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(result.rows_affected())
}

/// JSON-encode the embedding, or null it when it exceeds the store's
/// fixed dimensionality. An oversized vector points at an upstream data
/// problem but must never reject the row.
fn encode_embedding(item: &StagedItem) -> Option<String> {
    let vector = item.embedding.as_ref()?;
    if vector.is_empty() {
        return None;
    }
    if vector.len() > EMBEDDING_DIMS {
        warn!(
            business_key = %item.business_key,
            dims = vector.len(),
            "Embedding exceeds maximum allowed dimensions, nullifying"
        );
        return None;
    }
    serde_json::to_string(vector).ok()
}
