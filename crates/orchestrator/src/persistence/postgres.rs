//! PostgreSQL implementation of WorkflowStore
//!
//! Workflows live in one row each with their steps as a JSONB array;
//! restart history is an append-only side table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::error::{sqlx_kind, ErrorKind};
use crate::workflow::{
    Workflow, WorkflowHistory, WorkflowHistoryType, WorkflowStatus, WorkflowStep,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const WORKFLOW_COLUMNS: &str = "id, created_at, updated_at, parent_id, schema_name, status, \
     input, steps, error, error_kind, request_id";

/// PostgreSQL implementation of WorkflowStore
///
/// # Example
///
/// ```ignore
/// use flowline_orchestrator::PostgresWorkflowStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/flowline").await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self))]
    async fn get_workflow_by_id(&self, id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM flowline_workflows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get workflow: {}", e);
            db_error(e)
        })?
        .ok_or(StoreError::WorkflowNotFound(id))?;

        workflow_from_row(&row)
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO flowline_workflows
                (id, created_at, updated_at, parent_id, schema_name, status,
                 input, steps, error, error_kind, request_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(workflow.id)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.parent_id)
        .bind(workflow.schema_name.as_str())
        .bind(workflow.status.as_str())
        .bind(&workflow.input)
        .bind(Json(&workflow.steps))
        .bind(&workflow.error)
        .bind(workflow.error_kind.map(|k| k.as_str()))
        .bind(&workflow.request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create workflow: {}", e);
            db_error(e)
        })?;

        debug!(schema = %workflow.schema_name, "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_workflows
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_updated(id, result.rows_affected())
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_workflow_force(
        &self,
        id: Uuid,
        update: WorkflowForceUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_workflows
            SET status = $2, error = $3, error_kind = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(update.error_kind.map(|k| k.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_updated(id, result.rows_affected())
    }

    #[instrument(skip(self, update))]
    async fn update_workflow_not_nil(
        &self,
        id: Uuid,
        update: WorkflowUpdate,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_workflows
            SET status = COALESCE($2, status),
                input = COALESCE($3, input),
                steps = COALESCE($4, steps),
                error = COALESCE($5, error),
                error_kind = COALESCE($6, error_kind),
                request_id = COALESCE($7, request_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.input)
        .bind(update.steps.map(Json))
        .bind(update.error)
        .bind(update.error_kind.map(|k| k.as_str()))
        .bind(update.request_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_updated(id, result.rows_affected())
    }

    #[instrument(skip(self, steps), fields(steps = steps.len()))]
    async fn put_workflow_steps(
        &self,
        id: Uuid,
        steps: &[WorkflowStep],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flowline_workflows
            SET steps = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(steps))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_updated(id, result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn search_workflows(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<Workflow>, Paging), StoreError> {
        const FILTER: &str = r#"
            WHERE ($1::TEXT IS NULL OR schema_name = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::UUID IS NULL OR parent_id = $3)
              AND ($4::TEXT IS NULL OR request_id = $4)
        "#;

        let status = params.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM flowline_workflows {FILTER}"
        ))
        .bind(&params.schema_name)
        .bind(status)
        .bind(params.parent_id)
        .bind(&params.request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM flowline_workflows {FILTER} \
             ORDER BY created_at DESC, id DESC OFFSET $5 LIMIT $6"
        ))
        .bind(&params.schema_name)
        .bind(status)
        .bind(params.parent_id)
        .bind(&params.request_id)
        .bind(i64::from(params.pagination.offset))
        .bind(i64::from(params.pagination.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let workflows = rows
            .iter()
            .map(workflow_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((
            workflows,
            Paging {
                total: total.max(0) as u64,
                offset: params.pagination.offset,
                limit: params.pagination.limit,
            },
        ))
    }

    #[instrument(skip(self, history), fields(workflow_id = %history.workflow_id))]
    async fn create_workflow_history(&self, history: &WorkflowHistory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO flowline_workflow_histories
                (id, created_at, type, input, input_previous, step_name, workflow_id,
                 workflow_status, workflow_error, workflow_error_kind, request_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(history.id)
        .bind(history.created_at)
        .bind(history.history_type.as_str())
        .bind(&history.input)
        .bind(&history.input_previous)
        .bind(history.step_name.as_str())
        .bind(history.workflow_id)
        .bind(history.workflow_status.as_str())
        .bind(&history.workflow_error)
        .bind(history.workflow_error_kind.map(|k| k.as_str()))
        .bind(&history.request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                StoreError::WorkflowNotFound(history.workflow_id)
            }
            other => db_error(other),
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_workflow_histories(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowHistory>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, created_at, type, input, input_previous, step_name, workflow_id,
                   workflow_status, workflow_error, workflow_error_kind, request_id
            FROM flowline_workflow_histories
            WHERE workflow_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(history_from_row).collect()
    }
}

fn ensure_updated(id: Uuid, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::WorkflowNotFound(id));
    }
    Ok(())
}

fn db_error(err: sqlx::Error) -> StoreError {
    match sqlx_kind(&err) {
        ErrorKind::Conflict => StoreError::Conflict(err.to_string()),
        _ => StoreError::Database(err.to_string()),
    }
}

fn workflow_from_row(row: &PgRow) -> Result<Workflow, StoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let error_kind: Option<String> = row.try_get("error_kind").map_err(db_error)?;
    let schema_name: String = row.try_get("schema_name").map_err(db_error)?;
    let steps: Json<Vec<WorkflowStep>> = row.try_get("steps").map_err(db_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_error)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(db_error)?;
    let input: Option<Value> = row.try_get("input").map_err(db_error)?;

    Ok(Workflow {
        id: row.try_get("id").map_err(db_error)?,
        created_at,
        updated_at,
        parent_id: row.try_get("parent_id").map_err(db_error)?,
        schema_name: schema_name.into(),
        status: parse_workflow_status(&status)?,
        input,
        steps: steps.0,
        error: row.try_get("error").map_err(db_error)?,
        error_kind: error_kind.as_deref().map(parse_error_kind),
        request_id: row.try_get("request_id").map_err(db_error)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<WorkflowHistory, StoreError> {
    let history_type: String = row.try_get("type").map_err(db_error)?;
    let step_name: String = row.try_get("step_name").map_err(db_error)?;
    let status: String = row.try_get("workflow_status").map_err(db_error)?;
    let error_kind: Option<String> = row.try_get("workflow_error_kind").map_err(db_error)?;

    Ok(WorkflowHistory {
        id: row.try_get("id").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        history_type: WorkflowHistoryType::parse(&history_type).ok_or_else(|| {
            StoreError::Database(format!("Unknown history type: {}", history_type))
        })?,
        input: row.try_get("input").map_err(db_error)?,
        input_previous: row.try_get("input_previous").map_err(db_error)?,
        step_name: step_name.into(),
        workflow_id: row.try_get("workflow_id").map_err(db_error)?,
        workflow_status: parse_workflow_status(&status)?,
        workflow_error: row.try_get("workflow_error").map_err(db_error)?,
        workflow_error_kind: error_kind.as_deref().map(parse_error_kind),
        request_id: row.try_get("request_id").map_err(db_error)?,
    })
}

fn parse_workflow_status(status: &str) -> Result<WorkflowStatus, StoreError> {
    WorkflowStatus::parse(status)
        .ok_or_else(|| StoreError::Database(format!("Unknown workflow status: {}", status)))
}

// Kinds written by newer versions degrade to `Other` instead of failing the read
fn parse_error_kind(kind: &str) -> ErrorKind {
    ErrorKind::parse(kind).unwrap_or(ErrorKind::Other)
}
