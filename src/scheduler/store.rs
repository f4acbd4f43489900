//! 任务持久化接口
//!
//! 引擎本身不绑定任何存储：启动时通过 [`TaskStore::load_tasks`] 读入任务，
//! 每次状态变化后通过 [`TaskStore::save_task_status`] 回写（如看板系统）。
//!
//! ## 内置实现
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`InMemoryTaskStore`] | 进程内存，重启即清空，适合测试 |
//! | [`FileTaskStore`] | JSON 文件持久化，适合本地单机场景 |

use crate::error::{Result, StoreError};
use crate::tasks::Task;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

// ── TaskStore trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 读取全部任务（顺序即插入顺序）
    async fn load_tasks(&self) -> Result<Vec<Task>>;

    /// 回写单个任务的最新状态（不存在则追加）
    async fn save_task_status(&self, task: &Task) -> Result<()>;
}

fn upsert(tasks: &mut Vec<Task>, task: &Task) {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(existing) => *existing = task.clone(),
        None => tasks.push(task.clone()),
    }
}

// ── InMemoryTaskStore ─────────────────────────────────────────────────────────

/// 进程内存 TaskStore，不持久化
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().await.clone())
    }

    async fn save_task_status(&self, task: &Task) -> Result<()> {
        upsert(&mut *self.tasks.write().await, task);
        Ok(())
    }
}

// ── FileTaskStore ─────────────────────────────────────────────────────────────

/// 基于 JSON 文件的 TaskStore
///
/// 文件内容是任务数组；写时立即落盘，读时从内存缓存返回。
pub struct FileTaskStore {
    path: PathBuf,
    tasks: RwLock<Vec<Task>>,
}

impl FileTaskStore {
    /// 打开或创建任务文件，自动建父目录
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::IoError(format!("创建目录失败: {e}")))?;
        }
        let tasks: Vec<Task> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::IoError(format!("读取任务文件失败: {e}")))?;
            serde_json::from_str(&raw)
                .map_err(|e| StoreError::SerializationError(format!("任务文件解析失败: {e}")))?
        } else {
            Vec::new()
        };
        info!(path = %path.display(), tasks = tasks.len(), "🗄️ FileTaskStore 初始化");
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    async fn flush(&self) -> Result<()> {
        let tasks = self.tasks.read().await;
        let json = serde_json::to_string_pretty(&*tasks)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::IoError(format!("写入任务文件失败: {e}")))?;
        debug!(path = %self.path.display(), "💾 任务已持久化");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.read().await.clone())
    }

    async fn save_task_status(&self, task: &Task) -> Result<()> {
        upsert(&mut *self.tasks.write().await, task);
        self.flush().await
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") {
        if let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
        {
            return PathBuf::from(home).join(&s[2..]);
        }
    }
    path.to_path_buf()
}
