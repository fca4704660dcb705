//! Processing task persistence.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::model::{Task, TaskStatus};

use super::{parse_datetime, parse_datetime_opt, Store};

const TASK_COLUMNS: &str = "id, task_id, article_id, type, status, progress, current_step, \
     last_error, created_at, started_at, completed_at";

impl Store {
    /// Create a pending task for an article.
    pub fn create_task(&self, task_id: &str, article_id: i64, task_type: &str) -> Result<Task> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (task_id, article_id, type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![task_id, article_id, task_type, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.get_task(task_id)
    }

    /// Get a task by its string id.
    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                params![task_id],
                row_to_task,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("task", task_id))
        })
    }

    /// Move a task to a new status, stamping `started_at` on the first
    /// transition into `running` and `completed_at` on terminal states.
    pub fn set_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET
                    status = ?2,
                    last_error = COALESCE(?3, last_error),
                    started_at = CASE WHEN ?2 = 'running' AND started_at IS NULL
                                      THEN ?4 ELSE started_at END,
                    completed_at = CASE WHEN ?2 IN ('completed', 'failed', 'cancelled')
                                        THEN ?4 ELSE completed_at END
                 WHERE task_id = ?1",
                params![task_id, status.as_str(), error, now],
            )?;
            if updated == 0 {
                return Err(Error::not_found("task", task_id));
            }
            Ok(())
        })
    }

    /// Record progress. Progress never decreases; stale writers lose.
    pub fn set_task_progress(&self, task_id: &str, progress: f64) -> Result<()> {
        let clamped = progress.clamp(0.0, 100.0);
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET progress = MAX(progress, ?2) WHERE task_id = ?1",
                params![task_id, clamped],
            )?;
            if updated == 0 {
                return Err(Error::not_found("task", task_id));
            }
            Ok(())
        })
    }

    /// Record the step a task is currently executing.
    pub fn set_task_step(&self, task_id: &str, step: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET current_step = ?2 WHERE task_id = ?1",
                params![task_id, step],
            )?;
            if updated == 0 {
                return Err(Error::not_found("task", task_id));
            }
            Ok(())
        })
    }

    /// Tasks that are still pending or running, oldest first.
    pub fn list_active_tasks(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE status IN ('pending', 'running')
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let tasks = stmt
                .query_map([], row_to_task)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// All tasks for an article, newest first.
    pub fn tasks_for_article(&self, article_id: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE article_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let tasks = stmt
                .query_map(params![article_id], row_to_task)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        task_id: row.get(1)?,
        article_id: row.get(2)?,
        task_type: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        progress: row.get(5)?,
        current_step: row.get(6)?,
        last_error: row.get(7)?,
        created_at: parse_datetime(row.get(8)?),
        started_at: parse_datetime_opt(row.get(9)?),
        completed_at: parse_datetime_opt(row.get(10)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArticleDraft;
    use pretty_assertions::assert_eq;

    fn store_with_article() -> (Store, i64) {
        let store = Store::in_memory().unwrap();
        let id = store
            .create_article(&ArticleDraft::from_url("https://example.com/a", "medium"))
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_task_lifecycle_stamps() {
        let (store, article_id) = store_with_article();
        let task = store.create_task("t-1", article_id, "article_processing").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());

        store
            .set_task_status("t-1", TaskStatus::Running, None)
            .unwrap();
        let task = store.get_task("t-1").unwrap();
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_none());

        store
            .set_task_status("t-1", TaskStatus::Completed, None)
            .unwrap();
        let task = store.get_task("t-1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (store, article_id) = store_with_article();
        store.create_task("t-1", article_id, "article_processing").unwrap();

        store.set_task_progress("t-1", 40.0).unwrap();
        store.set_task_progress("t-1", 20.0).unwrap();
        assert_eq!(store.get_task("t-1").unwrap().progress, 40.0);

        store.set_task_progress("t-1", 250.0).unwrap();
        assert_eq!(store.get_task("t-1").unwrap().progress, 100.0);
    }

    #[test]
    fn test_failed_task_keeps_error() {
        let (store, article_id) = store_with_article();
        store.create_task("t-1", article_id, "article_processing").unwrap();

        store
            .set_task_status("t-1", TaskStatus::Failed, Some("detector unreachable"))
            .unwrap();
        let task = store.get_task("t-1").unwrap();
        assert_eq!(task.last_error.as_deref(), Some("detector unreachable"));
    }

    #[test]
    fn test_list_active_tasks() {
        let (store, article_id) = store_with_article();
        store.create_task("t-1", article_id, "article_processing").unwrap();
        store.create_task("t-2", article_id, "article_processing").unwrap();
        store
            .set_task_status("t-1", TaskStatus::Completed, None)
            .unwrap();

        let active = store.list_active_tasks().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, "t-2");
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let (store, _) = store_with_article();
        assert!(matches!(
            store.get_task("nope").unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(store.set_task_progress("nope", 10.0).is_err());
    }
}
