//! 任务定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// 待处理
    Todo,
    /// 已分配，进行中
    InProgress,
    /// 阻塞（上报失败或受阻，需要人工介入或重试）
    Blocked,
    /// 已完成（终态）
    Done,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// 项目阶段，按生命周期先后排序
///
/// 依赖只能指向同阶段或更早阶段的任务，不能"向前"指。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    Design,
    Infrastructure,
    Implementation,
    Testing,
    Documentation,
    Deployment,
}

impl TaskPhase {
    pub const ALL: [TaskPhase; 6] = [
        TaskPhase::Design,
        TaskPhase::Infrastructure,
        TaskPhase::Implementation,
        TaskPhase::Testing,
        TaskPhase::Documentation,
        TaskPhase::Deployment,
    ];

    /// 阶段序号，DESIGN = 1 ... DEPLOYMENT = 6
    pub fn order(&self) -> u8 {
        match self {
            TaskPhase::Design => 1,
            TaskPhase::Infrastructure => 2,
            TaskPhase::Implementation => 3,
            TaskPhase::Testing => 4,
            TaskPhase::Documentation => 5,
            TaskPhase::Deployment => 6,
        }
    }

    /// 小写名称，用于拼接 `design_<domain>` 形式的别名
    pub fn slug(&self) -> &'static str {
        match self {
            TaskPhase::Design => "design",
            TaskPhase::Infrastructure => "infrastructure",
            TaskPhase::Implementation => "implementation",
            TaskPhase::Testing => "testing",
            TaskPhase::Documentation => "documentation",
            TaskPhase::Deployment => "deployment",
        }
    }

    /// 从标签解析阶段（大小写不敏感，支持常见缩写）
    pub fn from_label(label: &str) -> Option<TaskPhase> {
        match label.trim().to_lowercase().as_str() {
            "design" => Some(TaskPhase::Design),
            "infrastructure" | "infra" => Some(TaskPhase::Infrastructure),
            "implementation" | "impl" => Some(TaskPhase::Implementation),
            "testing" | "test" => Some(TaskPhase::Testing),
            "documentation" | "docs" => Some(TaskPhase::Documentation),
            "deployment" | "deploy" => Some(TaskPhase::Deployment),
            _ => None,
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug().to_uppercase())
    }
}

/// 依赖边的类别，仅用于诊断输出，不影响解析语义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    Phase,
    Feature,
    Technical,
    Data,
    Global,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 任务 ID（数字形式或 slug）
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    /// 原始依赖引用，可能是规范 ID 也可能是 slug，读取时才解析
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub is_subtask: bool,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub phase: Option<TaskPhase>,
    /// 优先级 (0-10, 10 最高)
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// 预估工时，用于关键路径计算
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// 租约到期时间（Unix 秒）
    #[serde(default)]
    pub lease_expires_at: Option<u64>,
    /// 最近一次上报的进度 (0-100)
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

fn default_status() -> TaskStatus {
    TaskStatus::Todo
}

fn default_priority() -> u8 {
    5
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: TaskStatus::Todo,
            dependencies: Vec::new(),
            labels: BTreeSet::new(),
            is_subtask: false,
            parent_task_id: None,
            phase: None,
            priority: default_priority(),
            estimated_hours: None,
            assigned_to: None,
            lease_expires_at: None,
            progress: 0,
            last_message: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    pub fn with_phase(mut self, phase: TaskPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// 标记为某个父任务拆分出的子任务
    pub fn subtask_of(mut self, parent_id: impl Into<String>) -> Self {
        self.is_subtask = true;
        self.parent_task_id = Some(parent_id.into());
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// 当前是否被某个 Agent 持有
    pub fn is_held_by(&self, agent_id: &str) -> bool {
        self.status == TaskStatus::InProgress && self.assigned_to.as_deref() == Some(agent_id)
    }

    /// 清除分配与租约
    pub(crate) fn release(&mut self) {
        self.assigned_to = None;
        self.lease_expires_at = None;
    }
}

/// slug 形式的 ID：包含字母或下划线（纯数字 ID 视为规范 ID）
pub fn is_slug(id: &str) -> bool {
    id.chars().any(|c| c.is_alphabetic() || c == '_')
}
