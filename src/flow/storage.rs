//! SQLite persistence layer for definitions and execution records
//!
//! Flows, chains and run records are stored as JSON columns with indexed
//! metadata fields. This is plain CRUD: the engine guarantees single-writer
//! per execution record, so no transactions are needed beyond sqlx defaults.

use crate::chain::types::{Chain, ChainExecution};
use crate::error::EngineError;
use crate::flow::types::{Execution, Flow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;

/// SQLite-backed definition and execution store.
#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    pool: SqlitePool,
}

impl DefinitionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the engine database under `data_dir`.
    pub async fn open(data_dir: &str) -> Result<Self, EngineError> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            EngineError::Validation(format!("cannot create data directory '{}': {}", data_dir, e))
        })?;
        let db_path = Path::new(data_dir).join("agentway.db");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same SQLite memory database.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("in-memory sqlite");
        let storage = Self::new(pool);
        storage.init_schema().await.expect("schema init");
        storage
    }

    /// Create all tables and indexes. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<(), EngineError> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chains (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSON NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chain_executions (
                id TEXT PRIMARY KEY,
                chain_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSON NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_flows_name ON flows(name)",
            "CREATE INDEX IF NOT EXISTS idx_chains_name ON chains(name)",
            "CREATE INDEX IF NOT EXISTS idx_executions_flow ON executions(flow_id)",
            "CREATE INDEX IF NOT EXISTS idx_chain_executions_chain ON chain_executions(chain_id)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Upsert a flow definition, refreshing updated_at.
    pub async fn save_flow(&self, flow: &Flow) -> Result<(), EngineError> {
        let definition = serde_json::to_string(flow)?;
        sqlx::query(
            r#"
            INSERT INTO flows (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&definition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_flow(&self, id: &str) -> Result<Option<Flow>, EngineError> {
        let row = sqlx::query("SELECT definition FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_flows(&self) -> Result<Vec<DefinitionMetadata>, EngineError> {
        self.list_definitions("flows").await
    }

    /// Load all flows for registry initialization.
    pub async fn load_all_flows(&self) -> Result<HashMap<String, Flow>, EngineError> {
        let rows = sqlx::query("SELECT id, definition FROM flows")
            .fetch_all(&self.pool)
            .await?;
        let mut flows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition: String = row.get("definition");
            flows.insert(id, serde_json::from_str(&definition)?);
        }
        Ok(flows)
    }

    pub async fn delete_flow(&self, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn save_chain(&self, chain: &Chain) -> Result<(), EngineError> {
        let definition = serde_json::to_string(chain)?;
        sqlx::query(
            r#"
            INSERT INTO chains (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&chain.id)
        .bind(&chain.name)
        .bind(&definition)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_chain(&self, id: &str) -> Result<Option<Chain>, EngineError> {
        let row = sqlx::query("SELECT definition FROM chains WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_chains(&self) -> Result<Vec<DefinitionMetadata>, EngineError> {
        self.list_definitions("chains").await
    }

    pub async fn delete_chain(&self, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query("DELETE FROM chains WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert a flow execution record (start writes the running record, the
    /// terminal transition overwrites it once).
    pub async fn save_execution(&self, execution: &Execution) -> Result<(), EngineError> {
        let record = serde_json::to_string(execution)?;
        let status = serde_json::to_value(execution.status)?;
        sqlx::query(
            r#"
            INSERT INTO executions (id, flow_id, status, record)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.flow_id)
        .bind(status.as_str().unwrap_or("running"))
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<Execution>, EngineError> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: String = row.get("record");
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    pub async fn save_chain_execution(
        &self,
        execution: &ChainExecution,
    ) -> Result<(), EngineError> {
        let record = serde_json::to_string(execution)?;
        let status = serde_json::to_value(execution.status)?;
        sqlx::query(
            r#"
            INSERT INTO chain_executions (id, chain_id, status, record)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.chain_id)
        .bind(status.as_str().unwrap_or("running"))
        .bind(&record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_chain_execution(
        &self,
        id: &str,
    ) -> Result<Option<ChainExecution>, EngineError> {
        let row = sqlx::query("SELECT record FROM chain_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: String = row.get("record");
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn list_definitions(&self, table: &str) -> Result<Vec<DefinitionMetadata>, EngineError> {
        let query = format!(
            "SELECT id, name, created_at, updated_at FROM {} ORDER BY updated_at DESC",
            table
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| DefinitionMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}

/// Listing metadata for flows and chains.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}
