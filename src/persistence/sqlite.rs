//! SQLite-backed document store (§4.11, §6.2). WAL mode, prepared-statement
//! caching, batched transactions, and `WITHOUT ROWID` tables follow the
//! signal-storage layer's high-volume patterns; TTL becomes a periodic sweep
//! task since SQLite has no native per-row expiry index.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;

use super::{Persistence, Sort, SortOrder};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -32000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS ohlc_history (
    id TEXT PRIMARY KEY,
    instrument TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    start_at TEXT NOT NULL,
    doc_json TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_ohlc_instrument_ts ON ohlc_history(instrument, start_at DESC);
CREATE INDEX IF NOT EXISTS idx_ohlc_instrument_tf_ts ON ohlc_history(instrument, timeframe, start_at DESC);

CREATE TABLE IF NOT EXISTS trades_executed (
    trade_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    entry_at TEXT NOT NULL,
    doc_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_trades_entry_at ON trades_executed(entry_at DESC);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades_executed(status);

CREATE TABLE IF NOT EXISTS agent_decisions (
    id TEXT PRIMARY KEY,
    agent_name TEXT NOT NULL,
    cycle_id TEXT NOT NULL,
    trade_id TEXT,
    at TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_decisions_at ON agent_decisions(at DESC);
CREATE INDEX IF NOT EXISTS idx_decisions_agent_at ON agent_decisions(agent_name, at DESC);
CREATE INDEX IF NOT EXISTS idx_decisions_trade ON agent_decisions(trade_id);

CREATE TABLE IF NOT EXISTS market_events (
    id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    source TEXT NOT NULL,
    event_at TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_events_at ON market_events(event_at DESC);
CREATE INDEX IF NOT EXISTS idx_events_type ON market_events(event_type);
CREATE INDEX IF NOT EXISTS idx_events_source ON market_events(source);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    severity TEXT NOT NULL,
    created_at TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at DESC);

CREATE TABLE IF NOT EXISTS strategy_parameters (
    strategy_name TEXT PRIMARY KEY,
    updated_at TEXT NOT NULL,
    doc_json TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_strategy_params_updated ON strategy_parameters(updated_at DESC);
"#;

/// Collection → (id-extracting field, secondary sort column, id column name).
fn table_meta(collection: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match collection {
        "ohlc_history" => Ok(("ohlc_history", "start_at", "id")),
        "trades_executed" => Ok(("trades_executed", "entry_at", "trade_id")),
        "agent_decisions" => Ok(("agent_decisions", "at", "id")),
        "market_events" => Ok(("market_events", "event_at", "id")),
        "alerts" => Ok(("alerts", "created_at", "id")),
        "strategy_parameters" => Ok(("strategy_parameters", "updated_at", "strategy_name")),
        other => anyhow::bail!("unknown collection: {other}"),
    }
}

pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL).context("failed to initialize persistence schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 30-day TTL sweep on raw OHLC history (§6.2). Run periodically from a
    /// background task; SQLite has no native TTL index.
    pub fn prune_ohlc_older_than(&self, days: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        let affected = conn.execute(
            "DELETE FROM ohlc_history WHERE start_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    pub fn optimize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA optimize; PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn id_value(doc: &Value, id_column: &str) -> Option<String> {
        doc.get(id_column).and_then(|v| v.as_str()).map(|s| s.to_string())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn insert(&self, collection: &str, doc: Value) -> Result<()> {
        let (table, sort_col, id_col) = table_meta(collection)?;
        let id = Self::id_value(&doc, id_col)
            .ok_or_else(|| anyhow::anyhow!("document for {collection} missing `{id_col}`"))?;
        let sort_value = doc
            .get(sort_col)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        let doc_json = serde_json::to_string(&doc)?;

        let conn = self.conn.lock();
        let extra_columns = extra_columns_for(table);
        let sql = build_insert_sql(table, id_col, sort_col, &extra_columns);
        let mut stmt = conn.prepare_cached(&sql)?;

        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(id.clone()), Box::new(sort_value)];
        for col in &extra_columns {
            let v = doc
                .get(*col)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_default();
            bound.push(Box::new(v));
        }
        bound.push(Box::new(doc_json));

        let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        stmt.execute(refs.as_slice())?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, query: Value, sort: Option<Sort>) -> Result<Option<Value>> {
        let results = self.find_many(collection, query, sort, 1).await?;
        Ok(results.into_iter().next())
    }

    async fn find_many(&self, collection: &str, query: Value, sort: Option<Sort>, limit: usize) -> Result<Vec<Value>> {
        let (table, default_sort_col, _id_col) = table_meta(collection)?;
        let sort_col = sort.as_ref().map(|s| s.field).unwrap_or(default_sort_col);
        let order = sort.map(|s| s.order).unwrap_or(SortOrder::Desc);
        let order_sql = match order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let conn = self.conn.lock();
        let (where_sql, binds) = build_where(&query);
        let sql = format!(
            "SELECT doc_json FROM {table} {where_sql} ORDER BY {sort_col} {order_sql} LIMIT ?{n}",
            n = binds.len() + 1
        );
        let mut stmt = conn.prepare_cached(&sql)?;

        let mut all_binds: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let limit_i64 = limit as i64;
        all_binds.push(&limit_i64);

        let rows = stmt.query_map(all_binds.as_slice(), |row| {
            let json: String = row.get(0)?;
            Ok(json)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }

    async fn update_one(&self, collection: &str, query: Value, update: Value) -> Result<bool> {
        let existing = self.find_one(collection, query, None).await?;
        let Some(mut doc) = existing else {
            return Ok(false);
        };
        if let (Value::Object(existing_map), Value::Object(patch)) = (&mut doc, &update) {
            for (k, v) in patch {
                existing_map.insert(k.clone(), v.clone());
            }
        }
        self.insert(collection, doc).await?;
        Ok(true)
    }
}

fn extra_columns_for(table: &str) -> Vec<&'static str> {
    match table {
        "ohlc_history" => vec!["instrument", "timeframe"],
        "trades_executed" => vec!["status"],
        "agent_decisions" => vec!["agent_name", "cycle_id", "trade_id"],
        "market_events" => vec!["event_type", "source"],
        "alerts" => vec!["severity"],
        _ => vec![],
    }
}

fn build_insert_sql(table: &str, id_col: &str, sort_col: &str, extra_columns: &[&str]) -> String {
    let mut columns = vec![id_col.to_string(), sort_col.to_string()];
    columns.extend(extra_columns.iter().map(|s| s.to_string()));
    columns.push("doc_json".to_string());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT OR REPLACE INTO {table} ({cols}) VALUES ({ph})",
        cols = columns.join(", "),
        ph = placeholders.join(", ")
    )
}

fn build_where(query: &Value) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let Value::Object(map) = query else {
        return (String::new(), Vec::new());
    };
    if map.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses = Vec::new();
    let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for (i, (k, v)) in map.iter().enumerate() {
        clauses.push(format!("{k} = ?{}", i + 1));
        match v {
            Value::String(s) => binds.push(Box::new(s.clone())),
            Value::Number(n) => binds.push(Box::new(n.as_f64().unwrap_or(0.0))),
            _ => binds.push(Box::new(v.to_string())),
        }
    }
    (format!("WHERE {}", clauses.join(" AND ")), binds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_find_trade() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqlitePersistence::open(db_path.to_str().unwrap()).unwrap();

        let doc = json!({
            "trade_id": "t-1",
            "status": "OPEN",
            "entry_at": "2026-01-01T00:00:00Z",
        });
        store.insert("trades_executed", doc).await.unwrap();

        let found = store
            .find_one("trades_executed", json!({"trade_id": "t-1"}), None)
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap()["status"], "OPEN");
    }

    #[tokio::test]
    async fn update_one_merges_fields() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SqlitePersistence::open(db_path.to_str().unwrap()).unwrap();

        store
            .insert(
                "trades_executed",
                json!({"trade_id": "t-2", "status": "OPEN", "entry_at": "2026-01-01T00:00:00Z"}),
            )
            .await
            .unwrap();

        let updated = store
            .update_one(
                "trades_executed",
                json!({"trade_id": "t-2"}),
                json!({"status": "CLOSED"}),
            )
            .await
            .unwrap();
        assert!(updated);

        let found = store
            .find_one("trades_executed", json!({"trade_id": "t-2"}), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["status"], "CLOSED");
    }
}
