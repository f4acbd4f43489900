//! 依赖校验
//!
//! 错误（`error`）会让相关任务在修复之前不可分配；警告（`warning`）只记录并对外展示。
//! 结构性错误只影响出问题的任务，图中其它部分照常推进。

mod task_type;

pub use task_type::{PhaseCandidate, TaskTypeIdentification, identify_task_type};

use crate::tasks::{DependencyGraph, DependencyResolver, TaskPhase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// 推断阶段作为建议输出的最低置信度
const SUGGESTION_CONFIDENCE: f32 = 0.3;
/// 推断阶段与显式阶段矛盾时，输出建议的最低置信度
const CONFLICT_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    /// 依赖指向了更晚的阶段
    InvalidPhase,
    /// 循环依赖
    Circular,
    /// 依赖引用解析不到任何任务
    Dangling,
    /// 子任务的父任务不存在
    MissingParent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyValidationError {
    pub task_id: String,
    pub dependency_id: Option<String>,
    pub error_type: ValidationErrorType,
    pub severity: Severity,
    pub message: String,
    pub suggested_fix: Option<String>,
    /// 仅 `circular` 类型使用：环上的任务 ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<String>,
}

/// 阶段建议（来自关键词推断，不会自动生效）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSuggestion {
    pub task_id: String,
    pub suggested_phase: TaskPhase,
    pub identification: TaskTypeIdentification,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<DependencyValidationError>,
    pub warnings: Vec<DependencyValidationError>,
    pub suggestions: Vec<PhaseSuggestion>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn push(&mut self, issue: DependencyValidationError) {
        match issue.severity {
            Severity::Error => {
                self.is_valid = false;
                self.errors.push(issue);
            }
            Severity::Warning => self.warnings.push(issue),
        }
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.suggestions.extend(other.suggestions);
    }

    /// 因错误而不可分配的任务：环上的所有任务，以及依赖方向违规的依赖方
    pub fn blocked_task_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for error in &self.errors {
            ids.insert(error.task_id.clone());
            ids.extend(error.cycle.iter().cloned());
        }
        ids
    }
}

/// 阶段顺序校验：依赖的阶段序号不能大于依赖方（包括从父任务继承的依赖）
pub fn validate_phase_ordering(graph: &DependencyGraph) -> ValidationResult {
    let mut result = ValidationResult::new();
    for edge in graph.edges() {
        let (Some(task), Some(dep)) = (graph.task(&edge.to), graph.task(&edge.from)) else {
            continue;
        };
        let (Some(task_phase), Some(dep_phase)) = (task.phase, dep.phase) else {
            continue;
        };
        if dep_phase.order() > task_phase.order() {
            result.push(DependencyValidationError {
                task_id: task.id.clone(),
                dependency_id: Some(dep.id.clone()),
                error_type: ValidationErrorType::InvalidPhase,
                severity: Severity::Error,
                message: format!(
                    "{} task '{}' depends on {} task '{}'",
                    task_phase, task.id, dep_phase, dep.id
                ),
                suggested_fix: Some(if edge.inherited {
                    format!(
                        "'{}' inherits this dependency from its parent; move '{}' to phase {} or later, or move '{}' out from under that parent",
                        task.id, task.id, dep_phase, task.id
                    )
                } else {
                    format!(
                        "Move '{}' to phase {} or earlier, or remove the dependency of '{}' on it",
                        dep.id, task_phase, task.id
                    )
                }),
                cycle: Vec::new(),
            });
        }
    }
    result
}

/// 循环依赖校验
pub fn validate_no_cycles(graph: &DependencyGraph) -> ValidationResult {
    let mut result = ValidationResult::new();
    for cycle in graph.detect_cycles() {
        let Some(first) = cycle.first().cloned() else {
            continue;
        };
        result.push(DependencyValidationError {
            task_id: first,
            dependency_id: None,
            error_type: ValidationErrorType::Circular,
            severity: Severity::Error,
            message: format!("Circular dependency: {}", cycle.join(" -> ")),
            suggested_fix: Some("Remove one dependency on the cycle".to_string()),
            cycle,
        });
    }
    result
}

/// 引用校验：悬空依赖与缺失的父任务（均为警告）
pub fn validate_references(graph: &DependencyGraph) -> ValidationResult {
    let mut result = ValidationResult::new();
    for dangling in graph.dangling() {
        result.push(DependencyValidationError {
            task_id: dangling.task_id.clone(),
            dependency_id: Some(dangling.reference.clone()),
            error_type: ValidationErrorType::Dangling,
            severity: Severity::Warning,
            message: format!(
                "Dependency '{}' of task '{}' does not match any task",
                dangling.reference, dangling.task_id
            ),
            suggested_fix: Some(
                "Fix the reference; the task stays unassignable until it resolves".to_string(),
            ),
            cycle: Vec::new(),
        });
    }

    let resolver = DependencyResolver::new(graph.tasks());
    for task in graph.tasks().filter(|t| t.is_subtask) {
        let parent = task
            .parent_task_id
            .as_deref()
            .map(|p| resolver.resolve_reference(p));
        let missing = match &parent {
            Some(p) => resolver.task(p).is_none(),
            None => true,
        };
        if missing {
            result.push(DependencyValidationError {
                task_id: task.id.clone(),
                dependency_id: parent,
                error_type: ValidationErrorType::MissingParent,
                severity: Severity::Warning,
                message: format!("Subtask '{}' has no resolvable parent task", task.id),
                suggested_fix: Some("Set parent_task_id to an existing task".to_string()),
                cycle: Vec::new(),
            });
        }
    }
    result
}

/// 阶段建议：未设置阶段的任务给出推断值；显式阶段与高置信度推断矛盾时也给出
pub fn suggest_phases(graph: &DependencyGraph) -> Vec<PhaseSuggestion> {
    graph
        .tasks()
        .filter_map(|task| {
            let identification = identify_task_type(task);
            let suggested_phase = identification.phase?;
            let wanted = match task.phase {
                None => identification.confidence >= SUGGESTION_CONFIDENCE,
                Some(_) => {
                    identification.conflicts_with_explicit()
                        && identification.confidence >= CONFLICT_CONFIDENCE
                }
            };
            wanted.then(|| PhaseSuggestion {
                task_id: task.id.clone(),
                suggested_phase,
                identification,
            })
        })
        .collect()
}

/// 只做会阻断分配的结构校验（环与阶段顺序），调度器每次分配时调用
pub fn structural_errors(graph: &DependencyGraph) -> ValidationResult {
    let mut result = validate_no_cycles(graph);
    result.merge(validate_phase_ordering(graph));
    result
}

/// 完整校验：环、阶段顺序、引用，外加阶段建议
pub fn validate_project(graph: &DependencyGraph) -> ValidationResult {
    let mut result = structural_errors(graph);
    result.merge(validate_references(graph));
    result.suggestions = suggest_phases(graph);

    if !result.is_valid {
        warn!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "⚠️ 依赖校验发现错误，相关任务将不可分配"
        );
    } else {
        debug!(
            warnings = result.warnings.len(),
            suggestions = result.suggestions.len(),
            "依赖校验通过"
        );
    }
    result
}
