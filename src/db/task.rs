//! Task store on Postgres.
//!
//! Status guards live in the `WHERE` clause of each `UPDATE`, so two agents
//! racing on the same task cannot both transition it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{LogEntry, NewLogEntry, NewTask, Task, TaskId, TaskStatus};
use crate::store::{Claim, StatusUpdate, TaskStore};

const TASK_COLUMNS: &str = "task_id, resource_sku, vendor_url, priority, status, created_at, started_at, completed_at, result, error_message";

impl Db {
    async fn current_status(&self, task_id: &TaskId) -> Result<Option<TaskStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM tasks WHERE task_id = $1")
            .bind(task_id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.map(|(status,)| status.parse()).transpose()
    }
}

#[async_trait]
impl TaskStore for Db {
    async fn insert_task(&self, task: &NewTask) -> Result<bool> {
        task.validate()?;
        let rows = sqlx::query(
            "INSERT INTO tasks (task_id, resource_sku, vendor_url, priority, status, created_at)
             VALUES ($1, $2, $3, $4, 'PENDING', $5)
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(task.task_id.as_str())
        .bind(&task.resource_sku)
        .bind(&task.vendor_url)
        .bind(task.priority)
        .bind(task.created_at)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn task_exists(&self, task_id: &TaskId) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM tasks WHERE task_id = $1")
            .bind(task_id.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1"))
                .bind(task_id.as_str())
                .fetch_optional(self.pool())
                .await?;
        row.map(TaskRow::try_into_task).transpose()
    }

    async fn begin_processing(
        &self,
        task_id: &TaskId,
        started_at: DateTime<Utc>,
    ) -> Result<Claim> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = 'IN_PROGRESS', started_at = $2
             WHERE task_id = $1 AND status IN ('PENDING', 'IN_PROGRESS')
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id.as_str())
        .bind(started_at)
        .fetch_optional(self.pool())
        .await?;

        if let Some(row) = row {
            return Ok(Claim::Started(row.try_into_task()?));
        }

        match self.current_status(task_id).await? {
            None => Ok(Claim::Missing),
            Some(status) if status.is_terminal() => Ok(Claim::Terminal(status)),
            // Inserted between the update and the read; let the caller retry.
            Some(status) => Err(Error::Other(format!(
                "task {task_id} appeared as {status} while claiming"
            ))),
        }
    }

    async fn update_status(&self, task_id: &TaskId, update: StatusUpdate) -> Result<Task> {
        update.validate()?;
        let (result, error_message) = match &update {
            StatusUpdate::Done { result, .. } => (Some(result), None),
            StatusUpdate::Failed { error_message, .. } => (None, Some(error_message.as_str())),
        };

        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = $2, completed_at = $3, result = $4, error_message = $5
             WHERE task_id = $1 AND status = 'IN_PROGRESS'
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id.as_str())
        .bind(update.status().as_str())
        .bind(update.completed_at())
        .bind(result)
        .bind(error_message)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_task(),
            None => match self.current_status(task_id).await? {
                None => Err(Error::NotFound(format!("task {task_id}"))),
                Some(from) => Err(Error::InvalidTransition {
                    from: from.to_string(),
                    to: update.status().to_string(),
                }),
            },
        }
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let entry = entry.into_entry(Utc::now());
        sqlx::query(
            "INSERT INTO task_logs (log_id, task_id, timestamp, level, message, component, details)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.log_id)
        .bind(entry.task_id.as_str())
        .bind(entry.timestamp)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(entry.component.as_str())
        .bind(&entry.details)
        .execute(self.pool())
        .await?;
        Ok(entry)
    }

    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            "SELECT log_id, task_id, timestamp, level, message, component, details
             FROM task_logs WHERE task_id = $1
             ORDER BY timestamp, log_id",
        )
        .bind(task_id.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(LogRow::try_into_entry).collect()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY priority DESC, created_at
             LIMIT $2"
        ))
        .bind(status.map(TaskStatus::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    async fn close(&self) {
        Db::close(self).await;
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    resource_sku: String,
    vendor_url: String,
    priority: i16,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            task_id: TaskId(self.task_id),
            resource_sku: self.resource_sku,
            vendor_url: self.vendor_url,
            priority: self.priority,
            status: self.status.parse()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result,
            error_message: self.error_message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    log_id: Uuid,
    task_id: String,
    timestamp: DateTime<Utc>,
    level: String,
    message: String,
    component: String,
    details: Option<serde_json::Value>,
}

impl LogRow {
    fn try_into_entry(self) -> Result<LogEntry> {
        Ok(LogEntry {
            log_id: self.log_id,
            task_id: TaskId(self.task_id),
            timestamp: self.timestamp,
            level: self.level.parse()?,
            message: self.message,
            component: self.component.parse()?,
            details: self.details,
        })
    }
}
