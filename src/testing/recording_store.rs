//! 记录型 TaskStore，用于检查调度器的回写行为
//!
//! # 典型用途
//! - 断言每次状态变化都触发了一次回写
//! - 测试回写失败时内存状态不回滚

use crate::error::{Result, StoreError};
use crate::scheduler::store::TaskStore;
use crate::tasks::Task;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// 按顺序记录每次 `save_task_status` 收到的任务快照。
///
/// 通过 [`with_save_failure`](Self::with_save_failure) 预设失败，
/// 队列里的失败按调用顺序依次消耗，耗尽后恢复正常。
#[derive(Default)]
pub struct RecordingTaskStore {
    initial: Mutex<Vec<Task>>,
    saves: Arc<Mutex<Vec<Task>>>,
    failures: Arc<Mutex<VecDeque<String>>>,
}

impl RecordingTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `load_tasks` 返回的初始任务
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            initial: Mutex::new(tasks),
            ..Default::default()
        }
    }

    /// 追加一次写入失败
    pub fn with_save_failure(self, msg: impl Into<String>) -> Self {
        self.failures.lock().unwrap().push_back(msg.into());
        self
    }

    /// 替换 `load_tasks` 返回的任务（测试 reload）
    pub fn replace_tasks(&self, tasks: Vec<Task>) {
        *self.initial.lock().unwrap() = tasks;
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn saves(&self) -> Vec<Task> {
        self.saves.lock().unwrap().clone()
    }

    /// 某个任务最后一次回写的快照
    pub fn last_saved(&self, task_id: &str) -> Option<Task> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.id == task_id)
            .cloned()
    }
}

#[async_trait]
impl TaskStore for RecordingTaskStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.initial.lock().unwrap().clone())
    }

    async fn save_task_status(&self, task: &Task) -> Result<()> {
        if let Some(msg) = self.failures.lock().unwrap().pop_front() {
            return Err(StoreError::IoError(msg).into());
        }
        self.saves.lock().unwrap().push(task.clone());
        Ok(())
    }
}
