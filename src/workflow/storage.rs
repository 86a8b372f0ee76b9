/// SQLite persistence for workflow definitions
///
/// Definitions live in the `workflow_definitions` table keyed by `flow_code`, with the
/// full definition stored as JSON next to the indexed `business_type` column.

use crate::error::EngineResult;
use crate::workflow::types::WorkflowDefinition;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    pool: SqlitePool,
}

/// Listing row for definitions
#[derive(Debug, serde::Serialize)]
pub struct DefinitionMetadata {
    pub flow_code: String,
    pub business_type: String,
    pub name: String,
    pub updated_at: String,
}

impl DefinitionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the definitions table; safe to call repeatedly
    pub async fn init_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                flow_code TEXT PRIMARY KEY,
                business_type TEXT NOT NULL,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflow_definitions_business_type
            ON workflow_definitions(business_type)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Validate and upsert a definition
    pub async fn save_definition(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        definition.validate()?;
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (flow_code, business_type, name, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(flow_code) DO UPDATE SET
                business_type = excluded.business_type,
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&definition.flow_code)
        .bind(&definition.business_type)
        .bind(&definition.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_definition(&self, flow_code: &str) -> EngineResult<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflow_definitions WHERE flow_code = ?")
            .bind(flow_code)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_definitions(&self) -> EngineResult<Vec<DefinitionMetadata>> {
        let rows = sqlx::query(
            "SELECT flow_code, business_type, name, CAST(updated_at AS TEXT) AS updated_at FROM workflow_definitions ORDER BY flow_code",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| DefinitionMetadata {
                flow_code: row.get("flow_code"),
                business_type: row.get("business_type"),
                name: row.get("name"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Every stored definition, used to (re)build the registry
    pub async fn load_all_definitions(&self) -> EngineResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query("SELECT definition FROM workflow_definitions")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.get("definition");
            definitions.push(serde_json::from_str(&definition_json)?);
        }

        Ok(definitions)
    }

    pub async fn delete_definition(&self, flow_code: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE flow_code = ?")
            .bind(flow_code)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
