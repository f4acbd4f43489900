//! 对外操作
//!
//! 每个 [`Operation`] 接收 JSON 参数、返回 JSON 结果，并自带参数的 JSON Schema。
//! [`OperationRegistry`] 按名称分发，传输层（HTTP、MCP、消息队列等）只需把请求转给它。
//!
//! 分配冲突这类只影响单次请求的错误会作为 `{"success": false, "error": ...}` 返回；
//! 参数错误、未知操作等调用方错误以 `Err` 返回。

use crate::error::{AssignmentError, EngineError, OperationError, Result};
use crate::scheduler::{AssignmentScheduler, Assignment, ProgressStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub type OperationParams = HashMap<String, Value>;

/// 操作接口
#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// 参数的 JSON Schema 定义
    fn parameters(&self) -> Value;
    async fn execute(&self, params: OperationParams) -> Result<Value>;
}

/// 对外暴露的操作描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ── 参数读取 ──────────────────────────────────────────────────────────────────

fn required_str<'a>(params: &'a OperationParams, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| OperationError::MissingParameter(name.to_string()).into())
}

fn invalid(name: &str, message: impl Into<String>) -> EngineError {
    OperationError::InvalidParameter {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

// ── request_next_task ─────────────────────────────────────────────────────────

pub struct RequestNextTaskOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl RequestNextTaskOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for RequestNextTaskOp {
    fn name(&self) -> &str {
        "request_next_task"
    }

    fn description(&self) -> &str {
        "为 Agent 分配下一个可执行的任务。没有可分配任务时立即返回原因，不会等待。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "已注册的 Agent ID"
                }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(&self, params: OperationParams) -> Result<Value> {
        let agent_id = required_str(&params, "agent_id")?;
        match self.scheduler.request_next_task(agent_id).await? {
            Assignment::Assigned(assigned) => Ok(json!({
                "success": true,
                "task": to_value(&assigned.task)?,
                "resolved_dependencies": assigned.resolved_dependencies,
                "lease_expires_at": assigned.lease_expires_at,
            })),
            Assignment::NoneAvailable { reason } => Ok(json!({
                "success": false,
                "reason": reason.as_str(),
            })),
        }
    }
}

// ── report_task_progress ──────────────────────────────────────────────────────

pub struct ReportTaskProgressOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl ReportTaskProgressOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for ReportTaskProgressOp {
    fn name(&self) -> &str {
        "report_task_progress"
    }

    fn description(&self) -> &str {
        "上报任务进度。in_progress 会续约，completed 标记完成，blocked / failed 按失败策略处理。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {"type": "string"},
                "task_id": {"type": "string"},
                "status": {
                    "type": "string",
                    "enum": ["in_progress", "completed", "blocked", "failed"]
                },
                "progress": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 100,
                    "description": "完成百分比，默认 0"
                },
                "message": {"type": "string"}
            },
            "required": ["agent_id", "task_id", "status"]
        })
    }

    async fn execute(&self, params: OperationParams) -> Result<Value> {
        let agent_id = required_str(&params, "agent_id")?;
        let task_id = required_str(&params, "task_id")?;
        let status: ProgressStatus = required_str(&params, "status")?
            .parse()
            .map_err(|e: String| invalid("status", e))?;
        let progress = match params.get("progress") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .filter(|p| *p <= 100)
                .ok_or_else(|| invalid("progress", "expected an integer between 0 and 100"))?
                as u8,
        };
        let message = params.get("message").and_then(|v| v.as_str());

        match self
            .scheduler
            .report_progress(agent_id, task_id, status, progress, message)
            .await
        {
            Ok(task) => Ok(json!({
                "success": true,
                "task": to_value(&task)?,
            })),
            Err(EngineError::Assignment(e @ AssignmentError::NotAssigned { .. })) => {
                debug!(agent = %agent_id, task = %task_id, "进度上报被拒绝: {}", e);
                Ok(json!({
                    "success": false,
                    "error": e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }
}

// ── 只读操作 ──────────────────────────────────────────────────────────────────

pub struct GetTaskGraphOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl GetTaskGraphOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for GetTaskGraphOp {
    fn name(&self) -> &str {
        "get_task_graph"
    }

    fn description(&self) -> &str {
        "返回依赖图快照：节点、边、悬空引用、执行顺序和关键路径。"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: OperationParams) -> Result<Value> {
        to_value(&self.scheduler.get_task_graph().await)
    }
}

pub struct ValidateProjectOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl ValidateProjectOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for ValidateProjectOp {
    fn name(&self) -> &str {
        "validate_project"
    }

    fn description(&self) -> &str {
        "校验依赖关系：循环依赖、阶段顺序、悬空引用，并给出阶段建议。"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: OperationParams) -> Result<Value> {
        to_value(&self.scheduler.validate_project().await)
    }
}

pub struct GetGridlockStatusOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl GetGridlockStatusOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for GetGridlockStatusOp {
    fn name(&self) -> &str {
        "get_gridlock_status"
    }

    fn description(&self) -> &str {
        "返回僵局检测状态、指标与诊断。"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: OperationParams) -> Result<Value> {
        to_value(&self.scheduler.get_gridlock_status().await)
    }
}

// ── 宿主 / 运维操作 ───────────────────────────────────────────────────────────

pub struct ReclaimExpiredLeasesOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl ReclaimExpiredLeasesOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for ReclaimExpiredLeasesOp {
    fn name(&self) -> &str {
        "reclaim_expired_leases"
    }

    fn description(&self) -> &str {
        "回收租约已过期的任务，退回 TODO。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "now": {
                    "type": "integer",
                    "description": "当前时间（Unix 秒）"
                }
            },
            "required": ["now"]
        })
    }

    async fn execute(&self, params: OperationParams) -> Result<Value> {
        let now = params
            .get("now")
            .ok_or_else(|| OperationError::MissingParameter("now".to_string()))?
            .as_u64()
            .ok_or_else(|| invalid("now", "expected a non-negative integer"))?;
        let reclaimed = self.scheduler.reclaim_expired_leases(now).await?;
        Ok(json!({ "reclaimed": reclaimed }))
    }
}

pub struct RegisterAgentOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl RegisterAgentOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for RegisterAgentOp {
    fn name(&self) -> &str {
        "register_agent"
    }

    fn description(&self) -> &str {
        "注册 Agent。只有已注册的 Agent 才能申请任务。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {"type": "string"}
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(&self, params: OperationParams) -> Result<Value> {
        let agent_id = required_str(&params, "agent_id")?;
        if agent_id.trim().is_empty() {
            return Err(invalid("agent_id", "must not be empty"));
        }
        let registered = self.scheduler.register_agent(agent_id).await;
        Ok(json!({ "success": true, "newly_registered": registered }))
    }
}

pub struct ResetGridlockCooldownOp {
    scheduler: Arc<AssignmentScheduler>,
}

impl ResetGridlockCooldownOp {
    pub fn new(scheduler: Arc<AssignmentScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Operation for ResetGridlockCooldownOp {
    fn name(&self) -> &str {
        "reset_gridlock_cooldown"
    }

    fn description(&self) -> &str {
        "清除僵局告警冷却期，问题仍存在时允许立即再次告警。"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: OperationParams) -> Result<Value> {
        self.scheduler.reset_gridlock_cooldown().await;
        Ok(json!({ "success": true }))
    }
}

// ── OperationRegistry ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Box<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置操作
    pub fn with_scheduler(scheduler: Arc<AssignmentScheduler>) -> Self {
        let mut registry = Self::new();
        registry.register_all(vec![
            Box::new(RequestNextTaskOp::new(scheduler.clone())),
            Box::new(ReportTaskProgressOp::new(scheduler.clone())),
            Box::new(GetTaskGraphOp::new(scheduler.clone())),
            Box::new(ValidateProjectOp::new(scheduler.clone())),
            Box::new(GetGridlockStatusOp::new(scheduler.clone())),
            Box::new(ReclaimExpiredLeasesOp::new(scheduler.clone())),
            Box::new(RegisterAgentOp::new(scheduler.clone())),
            Box::new(ResetGridlockCooldownOp::new(scheduler)),
        ]);
        registry
    }

    pub fn register(&mut self, operation: Box<dyn Operation>) {
        self.operations
            .insert(operation.name().to_string(), operation);
    }

    pub fn register_all(&mut self, operations: Vec<Box<dyn Operation>>) {
        for operation in operations {
            self.register(operation);
        }
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<&dyn Operation> {
        self.operations.get(name).map(|op| &**op)
    }

    pub fn definitions(&self) -> Vec<OperationDefinition> {
        let mut defs: Vec<OperationDefinition> = self
            .operations
            .values()
            .map(|op| OperationDefinition {
                name: op.name().to_string(),
                description: op.description().to_string(),
                parameters: op.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn dispatch(&self, name: &str, params: OperationParams) -> Result<Value> {
        let operation = self
            .get(name)
            .ok_or_else(|| OperationError::NotFound(name.to_string()))?;
        debug!(operation = %name, "执行操作");
        operation.execute(params).await
    }
}
