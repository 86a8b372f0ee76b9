/// SQLite persistence for approval instances and tasks
///
/// Mutators take a `&mut SqliteConnection` so the engine can run several of them inside
/// one transaction. Every update carries a status guard: tasks only leave PENDING once,
/// and terminal instances are never written again. Callers detect a lost race through
/// the returned `bool`.
///
/// Transactions open with `BEGIN IMMEDIATE`: the engine reads before it writes, and a
/// deferred transaction that upgrades its read lock fails with SQLITE_BUSY instead of
/// waiting on the busy timeout.

use crate::approval::types::{ApprovalInstance, ApprovalTask, InstanceStatus, TaskStatus};
use crate::error::{EngineError, EngineResult};
use crate::workflow::types::WorkflowDefinition;
use chrono::{DateTime, Utc};
use sqlx::{
    pool::PoolConnection,
    sqlite::{Sqlite, SqliteConnection, SqlitePool},
    Transaction,
};

const INSTANCE_COLUMNS: &str = "id, business_type, business_id, flow_code, initiator_id, status, \
     current_sequence, previous_instance_id, title, summary, rejection_reason, created_at, terminal_at";

const TASK_COLUMNS: &str = "id, instance_id, sequence, approver_id, status, decision_comment, \
     has_veto_power, due_date, decided_at, replaced_by, created_at";

#[derive(Debug, Clone)]
pub struct ApprovalStore {
    pool: SqlitePool,
}

impl ApprovalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Transaction holding the database write lock from its first statement
    pub async fn begin(&self) -> EngineResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub async fn connection(&self) -> EngineResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Create instance and task tables; safe to call repeatedly
    pub async fn init_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS approval_instances (
                id TEXT PRIMARY KEY,
                business_type TEXT NOT NULL,
                business_id TEXT NOT NULL,
                flow_code TEXT NOT NULL,
                initiator_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_sequence INTEGER NOT NULL,
                previous_instance_id TEXT REFERENCES approval_instances(id),
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                rejection_reason TEXT,
                created_at TEXT NOT NULL,
                terminal_at TEXT,
                definition JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one open instance per business entity
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_approval_instances_open_entity
            ON approval_instances(business_type, business_id)
            WHERE status IN ('pending', 'escalated')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_approval_instances_previous ON approval_instances(previous_instance_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS approval_tasks (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL REFERENCES approval_instances(id),
                sequence INTEGER NOT NULL,
                approver_id TEXT NOT NULL,
                status TEXT NOT NULL,
                decision_comment TEXT,
                has_veto_power BOOLEAN NOT NULL DEFAULT 0,
                due_date TEXT,
                decided_at TEXT,
                replaced_by TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_approval_tasks_cohort ON approval_tasks(instance_id, sequence)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_approval_tasks_approver ON approval_tasks(approver_id, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an instance together with the definition snapshot it runs on
    pub async fn insert_instance(
        &self,
        conn: &mut SqliteConnection,
        instance: &ApprovalInstance,
        definition: &WorkflowDefinition,
    ) -> EngineResult<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(&format!(
            "INSERT INTO approval_instances ({}, definition) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            INSTANCE_COLUMNS
        ))
        .bind(&instance.id)
        .bind(&instance.business_type)
        .bind(&instance.business_id)
        .bind(&instance.flow_code)
        .bind(&instance.initiator_id)
        .bind(instance.status)
        .bind(instance.current_sequence)
        .bind(&instance.previous_instance_id)
        .bind(&instance.title)
        .bind(&instance.summary)
        .bind(&instance.rejection_reason)
        .bind(instance.created_at)
        .bind(instance.terminal_at)
        .bind(&definition_json)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Definition snapshot taken when the instance was created
    pub async fn instance_definition(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
    ) -> EngineResult<WorkflowDefinition> {
        let definition_json: Option<String> =
            sqlx::query_scalar("SELECT definition FROM approval_instances WHERE id = ?")
                .bind(instance_id)
                .fetch_optional(&mut *conn)
                .await?;

        match definition_json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(EngineError::NotFound(format!("approval instance {}", instance_id))),
        }
    }

    pub async fn insert_task(&self, conn: &mut SqliteConnection, task: &ApprovalTask) -> EngineResult<()> {
        sqlx::query(&format!(
            "INSERT INTO approval_tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TASK_COLUMNS
        ))
        .bind(&task.id)
        .bind(&task.instance_id)
        .bind(task.sequence)
        .bind(&task.approver_id)
        .bind(task.status)
        .bind(&task.decision_comment)
        .bind(task.has_veto_power)
        .bind(task.due_date)
        .bind(task.decided_at)
        .bind(&task.replaced_by)
        .bind(task.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_instance(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(sqlx::query_as::<_, ApprovalInstance>(&format!(
            "SELECT {} FROM approval_instances WHERE id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Open (PENDING or ESCALATED) instance for an entity, if any
    pub async fn open_instance_for(
        &self,
        conn: &mut SqliteConnection,
        business_type: &str,
        business_id: &str,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(sqlx::query_as::<_, ApprovalInstance>(&format!(
            "SELECT {} FROM approval_instances \
             WHERE business_type = ? AND business_id = ? AND status IN ('pending', 'escalated')",
            INSTANCE_COLUMNS
        ))
        .bind(business_type)
        .bind(business_id)
        .fetch_optional(&mut *conn)
        .await?)
    }

    /// Instance that resubmitted `id`, if any
    pub async fn successor_of(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> EngineResult<Option<ApprovalInstance>> {
        Ok(sqlx::query_as::<_, ApprovalInstance>(&format!(
            "SELECT {} FROM approval_instances WHERE previous_instance_id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?)
    }

    pub async fn get_task(&self, conn: &mut SqliteConnection, id: &str) -> EngineResult<Option<ApprovalTask>> {
        Ok(sqlx::query_as::<_, ApprovalTask>(&format!(
            "SELECT {} FROM approval_tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?)
    }

    pub async fn cohort_tasks(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
        sequence: i64,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(sqlx::query_as::<_, ApprovalTask>(&format!(
            "SELECT {} FROM approval_tasks WHERE instance_id = ? AND sequence = ? ORDER BY rowid",
            TASK_COLUMNS
        ))
        .bind(instance_id)
        .bind(sequence)
        .fetch_all(&mut *conn)
        .await?)
    }

    pub async fn instance_tasks(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(sqlx::query_as::<_, ApprovalTask>(&format!(
            "SELECT {} FROM approval_tasks WHERE instance_id = ? ORDER BY sequence, rowid",
            TASK_COLUMNS
        ))
        .bind(instance_id)
        .fetch_all(&mut *conn)
        .await?)
    }

    pub async fn pending_tasks_for_approver(
        &self,
        conn: &mut SqliteConnection,
        approver_id: &str,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(sqlx::query_as::<_, ApprovalTask>(&format!(
            "SELECT {} FROM approval_tasks WHERE approver_id = ? AND status = 'pending' ORDER BY rowid",
            TASK_COLUMNS
        ))
        .bind(approver_id)
        .fetch_all(&mut *conn)
        .await?)
    }

    /// PENDING tasks whose due date lies before `now`
    ///
    /// Timestamps are stored as RFC 3339 UTC text, so text comparison orders them.
    pub async fn overdue_tasks(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<ApprovalTask>> {
        Ok(sqlx::query_as::<_, ApprovalTask>(&format!(
            "SELECT {} FROM approval_tasks \
             WHERE status = 'pending' AND due_date IS NOT NULL AND due_date < ? ORDER BY rowid",
            TASK_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *conn)
        .await?)
    }

    /// Record a decision; `false` when the task was no longer PENDING
    pub async fn decide_task(
        &self,
        conn: &mut SqliteConnection,
        task_id: &str,
        status: TaskStatus,
        comment: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tasks
            SET status = ?, decision_comment = ?, decided_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(status)
        .bind(comment)
        .bind(decided_at)
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark an overdue task ESCALATED; `false` when it was no longer PENDING
    pub async fn escalate_task(
        &self,
        conn: &mut SqliteConnection,
        task_id: &str,
        replaced_by: Option<&str>,
        escalated_at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE approval_tasks
            SET status = 'escalated', replaced_by = ?, decided_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(replaced_by)
        .bind(escalated_at)
        .bind(task_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Skip PENDING tasks of an instance, optionally limited to one cohort
    pub async fn skip_pending_tasks(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
        sequence: Option<i64>,
        at: DateTime<Utc>,
    ) -> EngineResult<u64> {
        let result = match sequence {
            Some(sequence) => {
                sqlx::query(
                    "UPDATE approval_tasks SET status = 'skipped', decided_at = ? \
                     WHERE instance_id = ? AND sequence = ? AND status = 'pending'",
                )
                .bind(at)
                .bind(instance_id)
                .bind(sequence)
                .execute(&mut *conn)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE approval_tasks SET status = 'skipped', decided_at = ? \
                     WHERE instance_id = ? AND status = 'pending'",
                )
                .bind(at)
                .bind(instance_id)
                .execute(&mut *conn)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    /// Move an open instance to a terminal status; `false` if it was already terminal
    pub async fn terminate_instance(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
        status: InstanceStatus,
        rejection_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        debug_assert!(status.is_terminal());
        let result = sqlx::query(
            r#"
            UPDATE approval_instances
            SET status = ?, rejection_reason = ?, terminal_at = ?
            WHERE id = ? AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(status)
        .bind(rejection_reason)
        .bind(at)
        .bind(instance_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Update an open instance's status and current cohort
    pub async fn update_open_instance(
        &self,
        conn: &mut SqliteConnection,
        instance_id: &str,
        status: InstanceStatus,
        current_sequence: i64,
    ) -> EngineResult<bool> {
        debug_assert!(status.is_open());
        let result = sqlx::query(
            r#"
            UPDATE approval_instances
            SET status = ?, current_sequence = ?
            WHERE id = ? AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(status)
        .bind(current_sequence)
        .bind(instance_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> ApprovalStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = ApprovalStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn instance(id: &str, business_id: &str) -> ApprovalInstance {
        ApprovalInstance {
            id: id.into(),
            business_type: "purchase_order".into(),
            business_id: business_id.into(),
            flow_code: "po".into(),
            initiator_id: "alice".into(),
            status: InstanceStatus::Pending,
            current_sequence: 1,
            previous_instance_id: None,
            title: "PO".into(),
            summary: String::new(),
            rejection_reason: None,
            created_at: Utc::now(),
            terminal_at: None,
        }
    }

    fn definition() -> WorkflowDefinition {
        serde_json::from_str(
            r#"{"flow_code": "po", "business_type": "purchase_order",
                "nodes": [{"sequence": 1, "kind": "sequential", "approvers": {"type": "static", "user_ids": ["bob"]}}]}"#,
        )
        .unwrap()
    }

    fn task(id: &str, instance_id: &str) -> ApprovalTask {
        ApprovalTask {
            id: id.into(),
            instance_id: instance_id.into(),
            sequence: 1,
            approver_id: "bob".into(),
            status: TaskStatus::Pending,
            decision_comment: None,
            has_veto_power: true,
            due_date: Some(Utc::now()),
            decided_at: None,
            replaced_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_trips_rows() {
        let store = store().await;
        let mut conn = store.connection().await.unwrap();
        store.insert_instance(&mut conn, &instance("i1", "po-1"), &definition()).await.unwrap();
        store.insert_task(&mut conn, &task("t1", "i1")).await.unwrap();

        let loaded = store.get_instance(&mut conn, "i1").await.unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Pending);
        assert_eq!(store.instance_definition(&mut conn, "i1").await.unwrap(), definition());
        assert!(store.instance_definition(&mut conn, "nope").await.is_err());
        let loaded_task = store.get_task(&mut conn, "t1").await.unwrap().unwrap();
        assert!(loaded_task.has_veto_power);
        assert!(store.overdue_tasks(&mut conn, Utc::now() - chrono::Duration::hours(1)).await.unwrap().is_empty());
        assert_eq!(store.overdue_tasks(&mut conn, Utc::now() + chrono::Duration::hours(1)).await.unwrap().len(), 1);
        assert_eq!(store.pending_tasks_for_approver(&mut conn, "bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn guards_reject_second_transition() {
        let store = store().await;
        let mut conn = store.connection().await.unwrap();
        store.insert_instance(&mut conn, &instance("i1", "po-1"), &definition()).await.unwrap();
        store.insert_task(&mut conn, &task("t1", "i1")).await.unwrap();

        let now = Utc::now();
        assert!(store
            .decide_task(&mut conn, "t1", TaskStatus::Approved, Some("ok"), now)
            .await
            .unwrap());
        assert!(!store
            .decide_task(&mut conn, "t1", TaskStatus::Rejected, None, now)
            .await
            .unwrap());
        assert!(!store.escalate_task(&mut conn, "t1", None, now).await.unwrap());

        assert!(store
            .terminate_instance(&mut conn, "i1", InstanceStatus::Approved, None, now)
            .await
            .unwrap());
        assert!(!store
            .terminate_instance(&mut conn, "i1", InstanceStatus::Rejected, Some("late"), now)
            .await
            .unwrap());
        assert!(!store
            .update_open_instance(&mut conn, "i1", InstanceStatus::Pending, 2)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn only_one_open_instance_per_entity() {
        let store = store().await;
        let mut conn = store.connection().await.unwrap();
        store.insert_instance(&mut conn, &instance("i1", "po-1"), &definition()).await.unwrap();
        assert!(store.insert_instance(&mut conn, &instance("i2", "po-1"), &definition()).await.is_err());

        store
            .terminate_instance(&mut conn, "i1", InstanceStatus::Withdrawn, None, Utc::now())
            .await
            .unwrap();
        store.insert_instance(&mut conn, &instance("i2", "po-1"), &definition()).await.unwrap();
        let open = store
            .open_instance_for(&mut conn, "purchase_order", "po-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.id, "i2");
    }
}
