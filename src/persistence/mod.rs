//! Persistence Layer (C11): append-only document store abstraction over a
//! relational backing, following the ingestion layer's WAL/prepared-
//! statement/FTS idioms.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

pub use sqlite::SqlitePersistence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub field: &'static str,
    pub order: SortOrder,
}

/// Polymorphic over a document-collection capability set (§4.11). All
/// documents are arbitrary JSON; collection-specific indexing lives in the
/// concrete backend.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn insert(&self, collection: &str, doc: Value) -> anyhow::Result<()>;
    async fn find_one(&self, collection: &str, query: Value, sort: Option<Sort>) -> anyhow::Result<Option<Value>>;
    async fn find_many(&self, collection: &str, query: Value, sort: Option<Sort>, limit: usize) -> anyhow::Result<Vec<Value>>;
    async fn update_one(&self, collection: &str, query: Value, update: Value) -> anyhow::Result<bool>;
}

/// Retries transient persistence failures up to 3 times with backoff (§7
/// `PersistenceTransient`); on exhaustion, logs and returns the error —
/// callers keep in-memory state authoritative for the current cycle.
pub async fn with_retry<T, F, Fut>(mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempts < 3 => {
                tracing::warn!(attempt = attempts, error = %e, "persistence operation failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempts as u64)).await;
            }
            Err(e) => {
                tracing::error!(attempts, error = %e, "persistence operation failed after retries");
                return Err(e);
            }
        }
    }
}
