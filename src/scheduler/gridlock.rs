//! 僵局检测
//!
//! 每次"申请任务但没有可分配任务"都会在滑动窗口里记一笔。窗口内失败次数达到阈值、
//! 所有 TODO 任务都被依赖卡住、且几乎没有进行中的任务时，判定为僵局（GRIDLOCK）。
//!
//! 告警有冷却期：僵局持续期间，冷却期内不会重复告警。检测器只给出诊断，
//! 不修改任何任务状态，也不做自动修复。状态不持久化，进程重启后从空窗口开始。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, error, info};

/// 僵局检测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridlockConfig {
    /// 滑动窗口长度（秒），默认 300
    pub window_secs: u64,
    /// 窗口内失败请求达到该次数才可能判定僵局，默认 3
    pub threshold: usize,
    /// 两次告警之间的最短间隔（秒），默认 600
    pub alert_cooldown_secs: u64,
    /// 进行中任务数不超过该值才可能判定僵局，默认 1
    pub max_in_progress: usize,
}

impl Default for GridlockConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            threshold: 3,
            alert_cooldown_secs: 600,
            max_in_progress: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GridlockState {
    Normal,
    Gridlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridlockSeverity {
    None,
    /// 所有 TODO 任务都被卡住，但尚未满足僵局条件
    Warning,
    Critical,
}

/// 一个被依赖卡住的 TODO 任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub name: String,
    pub unmet_dependencies: Vec<String>,
}

/// 调度器在锁内拷贝出的任务状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridlockSnapshot {
    pub todo_tasks: Vec<String>,
    pub blocked_tasks: Vec<BlockedTask>,
    pub in_progress_tasks: Vec<String>,
    /// 依赖 ID → 当前状态（不存在时为 `missing`）
    pub dependency_status: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridlockMetrics {
    pub recent_failed_requests: usize,
    pub todo_tasks: usize,
    pub blocked_tasks: usize,
    pub in_progress_tasks: usize,
    pub window_secs: u64,
}

/// 卡住最多任务的未满足依赖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootBlocker {
    pub dependency_id: String,
    pub status: String,
    pub waiting_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridlockDiagnosis {
    pub summary: String,
    pub blocking_tasks: Vec<BlockedTask>,
    pub root_blockers: Vec<RootBlocker>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridlockAlert {
    pub alert_id: String,
    pub raised_at: u64,
    pub metrics: GridlockMetrics,
    pub diagnosis: GridlockDiagnosis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridlockStatus {
    pub is_gridlock: bool,
    pub state: GridlockState,
    pub severity: GridlockSeverity,
    pub metrics: GridlockMetrics,
    pub diagnosis: Option<GridlockDiagnosis>,
    pub last_alert_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct FailedRequest {
    agent_id: String,
    at: u64,
}

pub struct GridlockDetector {
    config: GridlockConfig,
    failed_requests: VecDeque<FailedRequest>,
    last_alert_at: Option<u64>,
    state: GridlockState,
    alerts_raised: u64,
}

impl GridlockDetector {
    pub fn new(config: GridlockConfig) -> Self {
        Self {
            config,
            failed_requests: VecDeque::new(),
            last_alert_at: None,
            state: GridlockState::Normal,
            alerts_raised: 0,
        }
    }

    pub fn state(&self) -> GridlockState {
        self.state
    }

    pub fn alerts_raised(&self) -> u64 {
        self.alerts_raised
    }

    /// 记录一次失败的任务请求，满足条件且不在冷却期内时返回告警
    pub fn record_failed_request(
        &mut self,
        agent_id: &str,
        now: u64,
        snapshot: &GridlockSnapshot,
    ) -> Option<GridlockAlert> {
        self.failed_requests.push_back(FailedRequest {
            agent_id: agent_id.to_string(),
            at: now,
        });
        let status = self.evaluate(now, snapshot);
        debug!(
            agent = %agent_id,
            recent_failed = status.metrics.recent_failed_requests,
            blocked = status.metrics.blocked_tasks,
            todo = status.metrics.todo_tasks,
            "记录失败的任务请求"
        );

        if !status.is_gridlock || self.in_cooldown(now) {
            return None;
        }

        let diagnosis = status.diagnosis?;
        self.last_alert_at = Some(now);
        self.alerts_raised += 1;
        let alert = GridlockAlert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            raised_at: now,
            metrics: status.metrics,
            diagnosis,
        };
        error!(
            alert_id = %alert.alert_id,
            blocked = alert.metrics.blocked_tasks,
            "🚨 检测到项目僵局: {}",
            alert.diagnosis.summary
        );
        Some(alert)
    }

    /// 重新评估当前状态（会清理窗口外的事件并更新状态机）
    pub fn evaluate(&mut self, now: u64, snapshot: &GridlockSnapshot) -> GridlockStatus {
        self.prune(now);

        let metrics = GridlockMetrics {
            recent_failed_requests: self.failed_requests.len(),
            todo_tasks: snapshot.todo_tasks.len(),
            blocked_tasks: snapshot.blocked_tasks.len(),
            in_progress_tasks: snapshot.in_progress_tasks.len(),
            window_secs: self.config.window_secs,
        };

        let all_blocked = metrics.todo_tasks > 0 && metrics.blocked_tasks == metrics.todo_tasks;
        let is_gridlock = metrics.recent_failed_requests >= self.config.threshold
            && all_blocked
            && metrics.in_progress_tasks <= self.config.max_in_progress;

        let next = if is_gridlock {
            GridlockState::Gridlock
        } else {
            GridlockState::Normal
        };
        if next != self.state {
            info!(from = ?self.state, to = ?next, "僵局检测状态切换");
            self.state = next;
        }

        let severity = if is_gridlock {
            GridlockSeverity::Critical
        } else if all_blocked {
            GridlockSeverity::Warning
        } else {
            GridlockSeverity::None
        };

        let diagnosis = (severity != GridlockSeverity::None).then(|| diagnose(snapshot, &metrics));

        GridlockStatus {
            is_gridlock,
            state: self.state,
            severity,
            metrics,
            diagnosis,
            last_alert_at: self.last_alert_at,
        }
    }

    /// 运维介入后手动清除冷却期，允许立即再次告警
    pub fn reset_cooldown(&mut self) {
        self.last_alert_at = None;
        info!("僵局告警冷却期已重置");
    }

    /// 窗口内发起过失败请求的 Agent（去重，按首次出现排序）
    pub fn recent_agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = Vec::new();
        for req in &self.failed_requests {
            if !agents.contains(&req.agent_id) {
                agents.push(req.agent_id.clone());
            }
        }
        agents
    }

    fn in_cooldown(&self, now: u64) -> bool {
        self.last_alert_at
            .map(|t| now.saturating_sub(t) < self.config.alert_cooldown_secs)
            .unwrap_or(false)
    }

    fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.config.window_secs);
        while let Some(front) = self.failed_requests.front() {
            if front.at < cutoff {
                self.failed_requests.pop_front();
            } else {
                break;
            }
        }
    }
}

fn diagnose(snapshot: &GridlockSnapshot, metrics: &GridlockMetrics) -> GridlockDiagnosis {
    let mut waiting: BTreeMap<&str, usize> = BTreeMap::new();
    for blocked in &snapshot.blocked_tasks {
        for dep in &blocked.unmet_dependencies {
            *waiting.entry(dep.as_str()).or_default() += 1;
        }
    }

    let mut root_blockers: Vec<RootBlocker> = waiting
        .into_iter()
        .map(|(dep, count)| RootBlocker {
            dependency_id: dep.to_string(),
            status: snapshot
                .dependency_status
                .get(dep)
                .cloned()
                .unwrap_or_else(|| "missing".to_string()),
            waiting_tasks: count,
        })
        .collect();
    root_blockers.sort_by(|a, b| b.waiting_tasks.cmp(&a.waiting_tasks));

    let recommendations = root_blockers
        .iter()
        .map(|b| match b.status.as_str() {
            "missing" => format!(
                "Dependency '{}' does not resolve to any task; fix the reference",
                b.dependency_id
            ),
            "BLOCKED" => format!(
                "Unblock task '{}' ({} task(s) waiting on it)",
                b.dependency_id, b.waiting_tasks
            ),
            "IN_PROGRESS" => format!(
                "Check on the agent working on '{}' ({} task(s) waiting on it)",
                b.dependency_id, b.waiting_tasks
            ),
            _ => format!(
                "Task '{}' is {} and blocks {} task(s); check its own dependencies",
                b.dependency_id, b.status, b.waiting_tasks
            ),
        })
        .collect();

    GridlockDiagnosis {
        summary: format!(
            "{} of {} TODO tasks blocked, {} in progress, {} failed requests in the last {}s",
            metrics.blocked_tasks,
            metrics.todo_tasks,
            metrics.in_progress_tasks,
            metrics.recent_failed_requests,
            metrics.window_secs
        ),
        blocking_tasks: snapshot.blocked_tasks.clone(),
        root_blockers,
        recommendations,
    }
}
