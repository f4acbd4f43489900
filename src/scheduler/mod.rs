//! 任务分配调度器
//!
//! 所有会修改任务状态的操作（选择并分配、进度上报、租约回收、运维操作）
//! 都在同一把互斥锁内执行，"检查资格 → 分配"是原子的，同一任务不会被交给两个 Agent。
//!
//! 只读操作（依赖图、校验报告、僵局诊断）在锁内拷贝任务快照后立即释放锁，
//! 之后在快照上计算，不会长时间阻塞分配。
//!
//! 调度器不会等待任务变为可分配：没有可分配任务时立即返回 [`Assignment::NoneAvailable`]。
//! 租约回收也不自带后台线程，由宿主进程定时调用 [`AssignmentScheduler::reclaim_expired_leases`]。

pub mod clock;
pub mod gridlock;
pub mod store;

#[cfg(test)]
mod tests;

use crate::config::EngineConfig;
use crate::error::{AssignmentError, Result};
use crate::tasks::resolver::effective_phase;
use crate::tasks::{DependencyGraph, DependencyResolver, GraphSnapshot, Task, TaskManager, TaskStatus};
use crate::validation::{self, ValidationResult};
use clock::Clock;
use gridlock::{BlockedTask, GridlockDetector, GridlockSnapshot, GridlockStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use store::TaskStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ── 配置 ──────────────────────────────────────────────────────────────────────

/// 上报 blocked / failed 后任务的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 置为 BLOCKED，等待人工处理
    #[default]
    Block,
    /// 退回 TODO，允许其他 Agent 重试
    Retry,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" | "blocked" => Ok(FailurePolicy::Block),
            "retry" | "todo" => Ok(FailurePolicy::Retry),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 租约时长（秒），默认 1800
    pub lease_duration_secs: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: 1800,
            failure_policy: FailurePolicy::default(),
        }
    }
}

// ── 请求与响应类型 ────────────────────────────────────────────────────────────

/// Agent 上报的进度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// 仍在进行，续约
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_progress" | "progress" | "working" => Ok(ProgressStatus::InProgress),
            "completed" | "complete" | "done" => Ok(ProgressStatus::Completed),
            "blocked" => Ok(ProgressStatus::Blocked),
            "failed" | "failure" => Ok(ProgressStatus::Failed),
            other => Err(format!("unknown progress status: {}", other)),
        }
    }
}

/// 没有可分配任务的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoneAvailableReason {
    /// 没有剩余的 TODO 任务
    NoTasks,
    /// 剩余的 TODO 任务都被依赖或校验错误卡住
    AllBlocked,
    /// 剩余工作都已分配给其他 Agent
    AllAssigned,
}

impl NoneAvailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoneAvailableReason::NoTasks => "no_tasks",
            NoneAvailableReason::AllBlocked => "all_blocked",
            NoneAvailableReason::AllAssigned => "all_assigned",
        }
    }
}

impl fmt::Display for NoneAvailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分配给 Agent 的任务副本，附带解析后的依赖列表供 Agent 参考上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedTask {
    pub task: Task,
    pub resolved_dependencies: Vec<String>,
    pub lease_expires_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Assigned(AssignedTask),
    NoneAvailable { reason: NoneAvailableReason },
}

impl Assignment {
    pub fn task(&self) -> Option<&AssignedTask> {
        match self {
            Assignment::Assigned(t) => Some(t),
            Assignment::NoneAvailable { .. } => None,
        }
    }
}

// ── 调度器 ────────────────────────────────────────────────────────────────────

struct SchedulerState {
    tasks: TaskManager,
    agents: HashSet<String>,
}

enum Selection {
    Selected {
        task_id: String,
        resolved_dependencies: Vec<String>,
    },
    Unavailable {
        reason: NoneAvailableReason,
        snapshot: GridlockSnapshot,
    },
}

pub struct AssignmentScheduler {
    config: SchedulerConfig,
    /// 唯一的临界区：任务状态、分配、租约、已注册 Agent
    state: Mutex<SchedulerState>,
    /// 加锁顺序：先 state 后 gridlock
    gridlock: Mutex<GridlockDetector>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl AssignmentScheduler {
    /// 从存储加载任务并创建调度器
    pub async fn new(
        config: &EngineConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let mut tasks = store.load_tasks().await?;
        normalize_loaded(&mut tasks, clock.now(), config.scheduler.lease_duration_secs);
        info!(
            tasks = tasks.len(),
            lease_secs = config.scheduler.lease_duration_secs,
            "🚀 调度器启动"
        );
        Ok(Self {
            config: config.scheduler.clone(),
            state: Mutex::new(SchedulerState {
                tasks: TaskManager::from_tasks(tasks),
                agents: HashSet::new(),
            }),
            gridlock: Mutex::new(GridlockDetector::new(config.gridlock.clone())),
            store,
            clock,
        })
    }

    /// 注册 Agent，返回是否为新注册
    pub async fn register_agent(&self, agent_id: &str) -> bool {
        let inserted = self.state.lock().await.agents.insert(agent_id.to_string());
        if inserted {
            info!(agent = %agent_id, "🤖 Agent 已注册");
        }
        inserted
    }

    /// 为 Agent 选择并分配下一个可执行任务
    pub async fn request_next_task(&self, agent_id: &str) -> Result<Assignment> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.agents.contains(agent_id) {
            return Err(AssignmentError::UnknownAgent(agent_id.to_string()).into());
        }

        let selection = select_task(&state.tasks);
        match selection {
            Selection::Selected {
                task_id,
                resolved_dependencies,
            } => {
                let lease_expires_at = now + self.config.lease_duration_secs;
                let task = state
                    .tasks
                    .get_task_mut(&task_id)
                    .ok_or_else(|| AssignmentError::TaskNotFound(task_id.clone()))?;
                task.status = TaskStatus::InProgress;
                task.assigned_to = Some(agent_id.to_string());
                task.lease_expires_at = Some(lease_expires_at);
                task.updated_at = now;
                let task = task.clone();

                self.persist(&task).await;
                info!(
                    agent = %agent_id,
                    task = %task.id,
                    lease_expires_at = lease_expires_at,
                    "📌 已分配任务: {}",
                    task.name
                );
                Ok(Assignment::Assigned(AssignedTask {
                    task,
                    resolved_dependencies,
                    lease_expires_at,
                }))
            }
            Selection::Unavailable { reason, snapshot } => {
                drop(state);
                debug!(agent = %agent_id, reason = %reason, "⏳ 没有可分配的任务");
                let alert = self
                    .gridlock
                    .lock()
                    .await
                    .record_failed_request(agent_id, now, &snapshot);
                if let Some(alert) = alert {
                    warn!(alert_id = %alert.alert_id, "项目可能已停滞，需要人工介入");
                }
                Ok(Assignment::NoneAvailable { reason })
            }
        }
    }

    /// Agent 上报任务进度
    pub async fn report_progress(
        &self,
        agent_id: &str,
        task_id: &str,
        status: ProgressStatus,
        progress: u8,
        message: Option<&str>,
    ) -> Result<Task> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_task_mut(task_id)
            .ok_or_else(|| AssignmentError::TaskNotFound(task_id.to_string()))?;

        if !task.is_held_by(agent_id) {
            return Err(AssignmentError::NotAssigned {
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
                assigned_to: task.assigned_to.clone(),
            }
            .into());
        }

        task.progress = progress.min(100);
        if let Some(message) = message {
            task.last_message = Some(message.to_string());
        }
        task.updated_at = now;

        match status {
            ProgressStatus::InProgress => {
                task.lease_expires_at = Some(now + self.config.lease_duration_secs);
            }
            ProgressStatus::Completed => {
                task.status = TaskStatus::Done;
                task.progress = 100;
                task.release();
            }
            ProgressStatus::Blocked | ProgressStatus::Failed => {
                task.status = match self.config.failure_policy {
                    FailurePolicy::Block => TaskStatus::Blocked,
                    FailurePolicy::Retry => TaskStatus::Todo,
                };
                task.release();
            }
        }
        let task = task.clone();
        self.persist(&task).await;

        match status {
            ProgressStatus::InProgress => {
                debug!(agent = %agent_id, task = %task_id, progress = task.progress, "任务进度更新，租约已续期")
            }
            ProgressStatus::Completed => info!(agent = %agent_id, task = %task_id, "✅ 任务完成"),
            _ => warn!(
                agent = %agent_id,
                task = %task_id,
                status = %task.status,
                message = task.last_message.as_deref().unwrap_or(""),
                "❌ 任务受阻或失败"
            ),
        }
        Ok(task)
    }

    /// 回收过期租约：IN_PROGRESS 且租约早于 `now` 的任务退回 TODO
    pub async fn reclaim_expired_leases(&self, now: u64) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut reclaimed = Vec::new();
        for id in state.tasks.ids() {
            let Some(task) = state.tasks.get_task_mut(&id) else {
                continue;
            };
            let expired = task.status == TaskStatus::InProgress
                && task.lease_expires_at.map(|l| l < now).unwrap_or(false);
            if !expired {
                continue;
            }
            warn!(
                task = %task.id,
                agent = task.assigned_to.as_deref().unwrap_or(""),
                "⌛ 租约过期，任务已回收"
            );
            task.status = TaskStatus::Todo;
            task.release();
            task.updated_at = now;
            reclaimed.push(task.clone());
        }
        for task in &reclaimed {
            self.persist(task).await;
        }
        Ok(reclaimed.len())
    }

    /// 新增或替换任务，依赖图在下一次请求时重新计算
    ///
    /// 替换已有任务时只更新描述、依赖、标签等定义字段；状态、分配、租约和进度
    /// 仍由调度器维护，不会被调用方的副本覆盖。
    pub async fn add_task(&self, mut task: Task) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.tasks.get_task(&task.id) {
            Some(existing) => {
                task.status = existing.status;
                task.assigned_to = existing.assigned_to.clone();
                task.lease_expires_at = existing.lease_expires_at;
                task.progress = existing.progress;
                task.last_message = existing.last_message.clone();
                task.created_at = existing.created_at;
                info!(task = %task.id, status = %task.status, "✏️ 更新任务定义: {}", task.name);
            }
            None => {
                normalize_loaded(std::slice::from_mut(&mut task), now, self.config.lease_duration_secs);
                if task.created_at == 0 {
                    task.created_at = now;
                }
                info!(task = %task.id, "➕ 新增任务: {}", task.name);
            }
        }
        task.updated_at = now;
        state.tasks.add_task(task.clone());
        self.persist(&task).await;
    }

    /// 运维操作：把未完成的任务重置为未分配的 TODO
    pub async fn reset_task(&self, task_id: &str) -> Result<Task> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_task_mut(task_id)
            .ok_or_else(|| AssignmentError::TaskNotFound(task_id.to_string()))?;
        if task.status == TaskStatus::Done {
            return Err(AssignmentError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
            }
            .into());
        }
        task.status = TaskStatus::Todo;
        task.release();
        task.updated_at = now;
        let task = task.clone();
        self.persist(&task).await;
        info!(task = %task_id, "🔄 任务已重置为 TODO");
        Ok(task)
    }

    /// 从存储重新加载全部任务
    pub async fn reload(&self) -> Result<usize> {
        let mut tasks = self.store.load_tasks().await?;
        normalize_loaded(&mut tasks, self.clock.now(), self.config.lease_duration_secs);
        let count = tasks.len();
        self.state.lock().await.tasks = TaskManager::from_tasks(tasks);
        info!(tasks = count, "任务集合已重新加载");
        Ok(count)
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.state.lock().await.tasks.get_task(task_id).cloned()
    }

    /// 锁内拷贝当前任务集合
    pub async fn snapshot(&self) -> Vec<Task> {
        self.state.lock().await.tasks.snapshot()
    }

    pub async fn summary(&self) -> String {
        self.state.lock().await.tasks.get_summary()
    }

    pub async fn get_task_graph(&self) -> GraphSnapshot {
        let tasks = self.snapshot().await;
        DependencyGraph::build(&tasks).snapshot()
    }

    pub async fn validate_project(&self) -> ValidationResult {
        let tasks = self.snapshot().await;
        validation::validate_project(&DependencyGraph::build(&tasks))
    }

    pub async fn get_gridlock_status(&self) -> GridlockStatus {
        let now = self.clock.now();
        let tasks = self.snapshot().await;
        let snapshot = gridlock_snapshot(&tasks);
        self.gridlock.lock().await.evaluate(now, &snapshot)
    }

    pub async fn reset_gridlock_cooldown(&self) {
        self.gridlock.lock().await.reset_cooldown();
    }

    /// 持久化失败只记录日志，内存状态为准
    async fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save_task_status(task).await {
            warn!(task = %task.id, error = %e, "任务状态持久化失败");
        }
    }
}

/// 修正外部写入的分配状态，保证每个任务都能被分配或被回收：
/// IN_PROGRESS 缺少持有者时退回 TODO，缺少租约时从 `now` 起补一份租约；
/// 其他状态的任务不应持有分配或租约。
fn normalize_loaded(tasks: &mut [Task], now: u64, lease_secs: u64) {
    for task in tasks.iter_mut() {
        match task.status {
            TaskStatus::InProgress if task.assigned_to.is_none() => {
                warn!(task = %task.id, "进行中的任务没有持有者，已退回 TODO");
                task.status = TaskStatus::Todo;
                task.release();
            }
            TaskStatus::InProgress if task.lease_expires_at.is_none() => {
                warn!(
                    task = %task.id,
                    agent = task.assigned_to.as_deref().unwrap_or(""),
                    "进行中的任务没有租约，已补发租约"
                );
                task.lease_expires_at = Some(now + lease_secs);
            }
            TaskStatus::InProgress => {}
            _ if task.assigned_to.is_some() || task.lease_expires_at.is_some() => {
                debug!(task = %task.id, status = %task.status, "清除非进行中任务的分配信息");
                task.release();
            }
            _ => {}
        }
    }
}

/// 在锁内执行：计算可分配任务并按平局规则选出一个
fn select_task(tasks: &TaskManager) -> Selection {
    let all = tasks.get_all_tasks();
    let resolver = tasks.resolver();
    let graph = tasks.graph();
    let invalid = validation::structural_errors(&graph).blocked_task_ids();

    let mut candidates: Vec<(usize, &Task)> = Vec::new();
    for (index, task) in all.iter().enumerate() {
        if task.status != TaskStatus::Todo || task.assigned_to.is_some() {
            continue;
        }
        if invalid.contains(&task.id) {
            debug!(task = %task.id, "任务存在校验错误，跳过");
            continue;
        }
        if resolver.dependencies_satisfied(task) {
            candidates.push((index, task));
            continue;
        }
        let dangling = resolver.dangling_dependencies(task);
        if !dangling.is_empty() {
            debug!(task = %task.id, dangling = ?dangling, "依赖引用无法解析，任务不可分配");
        }
    }

    candidates.sort_by_key(|(index, task)| {
        (
            Reverse(task.priority),
            effective_phase(task).map(|p| p.order()).unwrap_or(u8::MAX),
            Reverse(graph.open_dependents(&task.id)),
            *index,
        )
    });

    if let Some((_, task)) = candidates.first() {
        return Selection::Selected {
            task_id: task.id.clone(),
            resolved_dependencies: resolver.resolved_dependencies(task).into_iter().collect(),
        };
    }

    let todo: Vec<&&Task> = all.iter().filter(|t| t.status == TaskStatus::Todo).collect();
    let reason = if todo.is_empty() {
        if all.iter().any(|t| t.status == TaskStatus::InProgress) {
            NoneAvailableReason::AllAssigned
        } else {
            NoneAvailableReason::NoTasks
        }
    } else if todo.iter().all(|t| t.assigned_to.is_some()) {
        NoneAvailableReason::AllAssigned
    } else {
        NoneAvailableReason::AllBlocked
    };

    Selection::Unavailable {
        reason,
        snapshot: build_gridlock_snapshot(&resolver, all.iter().copied()),
    }
}

fn gridlock_snapshot(tasks: &[Task]) -> GridlockSnapshot {
    let resolver = DependencyResolver::new(tasks);
    build_gridlock_snapshot(&resolver, tasks.iter())
}

fn build_gridlock_snapshot<'a>(
    resolver: &DependencyResolver<'_>,
    tasks: impl IntoIterator<Item = &'a Task>,
) -> GridlockSnapshot {
    let mut snapshot = GridlockSnapshot::default();
    for task in tasks {
        match task.status {
            TaskStatus::Todo => {
                snapshot.todo_tasks.push(task.id.clone());
                let unmet = resolver.unmet_dependencies(task);
                if unmet.is_empty() {
                    continue;
                }
                for dep in &unmet {
                    let status = resolver
                        .task(dep)
                        .map(|t| t.status.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    snapshot.dependency_status.insert(dep.clone(), status);
                }
                snapshot.blocked_tasks.push(BlockedTask {
                    task_id: task.id.clone(),
                    name: task.name.clone(),
                    unmet_dependencies: unmet,
                });
            }
            TaskStatus::InProgress => snapshot.in_progress_tasks.push(task.id.clone()),
            TaskStatus::Blocked | TaskStatus::Done => {}
        }
    }
    snapshot
}
