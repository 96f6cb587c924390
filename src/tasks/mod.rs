//! 后台任务登记表
//!
//! 长耗时的深度研究在后台运行，调用方通过任务id轮询状态。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
    NotFound,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord<T> {
    pub id: String,
    pub label: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<T>,
}

type TaskTable<T> = Arc<Mutex<HashMap<String, TaskRecord<T>>>>;

/// 任务表，一把锁保护全部记录
pub struct TaskRegistry<T> {
    tasks: TaskTable<T>,
}

impl<T> Clone for TaskRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<T> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<T>(tasks: &TaskTable<T>) -> MutexGuard<'_, HashMap<String, TaskRecord<T>>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> TaskRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动后台任务，立即返回`dr_`前缀的任务id
    ///
    /// 任务panic时记录为error，不会影响其它任务。
    pub fn start<F>(&self, label: &str, job: F) -> String
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let id = format!("dr_{}", Uuid::new_v4().simple());
        lock(&self.tasks).insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                label: label.to_string(),
                status: TaskStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                error: None,
                result: None,
            },
        );
        info!("🚀 后台任务已启动: {} ({})", id, label);

        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(job).await;
            let mut table = lock(&tasks);
            let Some(record) = table.get_mut(&task_id) else {
                return;
            };
            record.completed_at = Some(Utc::now());
            match outcome {
                Ok(Ok(value)) => {
                    info!("✅ 后台任务完成: {}", task_id);
                    record.status = TaskStatus::Completed;
                    record.result = Some(value);
                }
                Ok(Err(e)) => {
                    warn!("❌ 后台任务失败: {} - {}", task_id, e);
                    record.status = TaskStatus::Error;
                    record.error = Some(e.to_string());
                }
                Err(join_error) => {
                    warn!("❌ 后台任务异常退出: {} - {}", task_id, join_error);
                    record.status = TaskStatus::Error;
                    record.error = Some(format!("Task panicked: {}", join_error));
                }
            }
        });

        id
    }

    pub fn status(&self, id: &str) -> TaskStatus {
        lock(&self.tasks)
            .get(id)
            .map(|record| record.status)
            .unwrap_or(TaskStatus::NotFound)
    }

    pub fn record(&self, id: &str) -> Option<TaskRecord<T>> {
        lock(&self.tasks).get(id).cloned()
    }

    /// 仅在任务完成后返回结果
    pub fn result(&self, id: &str) -> Option<T> {
        lock(&self.tasks)
            .get(id)
            .filter(|record| record.status == TaskStatus::Completed)
            .and_then(|record| record.result.clone())
    }

    pub fn list(&self) -> Vec<TaskRecord<T>> {
        let mut records: Vec<_> = lock(&self.tasks).values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    /// 删除已结束的任务记录，返回删除数量
    pub fn prune_finished(&self) -> usize {
        let mut table = lock(&self.tasks);
        let before = table.len();
        table.retain(|_, record| record.status == TaskStatus::Running);
        before - table.len()
    }
}

#[cfg(test)]
mod tests;
