//! 任务管理器

use crate::tasks::graph::DependencyGraph;
use crate::tasks::resolver::DependencyResolver;
use crate::tasks::task::{Task, TaskStatus};
use std::collections::HashMap;

/// 任务集合，保持插入顺序（作为分配时的最终平局规则）
#[derive(Debug, Clone, Default)]
pub struct TaskManager {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut manager = Self::new();
        for task in tasks {
            manager.add_task(task);
        }
        manager
    }

    /// 新增或替换任务；替换时保留原插入位置
    pub fn add_task(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 插入序号，任务不存在时返回 `usize::MAX`
    pub fn position(&self, id: &str) -> usize {
        self.order.iter().position(|x| x == id).unwrap_or(usize::MAX)
    }

    /// 按插入顺序返回所有任务
    pub fn get_all_tasks(&self) -> Vec<&Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id)).collect()
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.get_all_tasks()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 拷贝当前任务集合，供锁外的只读计算使用
    pub fn snapshot(&self) -> Vec<Task> {
        self.get_all_tasks().into_iter().cloned().collect()
    }

    pub fn resolver(&self) -> DependencyResolver<'_> {
        DependencyResolver::new(self.get_all_tasks())
    }

    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::build(self.get_all_tasks())
    }

    /// 获取进度统计 (已完成, 总数)
    pub fn get_progress(&self) -> (usize, usize) {
        let completed = self.get_tasks_by_status(TaskStatus::Done).len();
        (completed, self.len())
    }

    pub fn is_all_completed(&self) -> bool {
        self.tasks.values().all(|t| t.status == TaskStatus::Done)
    }

    /// 任务进度摘要
    pub fn get_summary(&self) -> String {
        let (completed, total) = self.get_progress();
        format!(
            "任务进度: {}/{} 完成 | {} 待处理 | {} 进行中 | {} 阻塞",
            completed,
            total,
            self.get_tasks_by_status(TaskStatus::Todo).len(),
            self.get_tasks_by_status(TaskStatus::InProgress).len(),
            self.get_tasks_by_status(TaskStatus::Blocked).len(),
        )
    }
}
