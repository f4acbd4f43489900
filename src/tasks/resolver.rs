//! 依赖解析
//!
//! 任务的 `dependencies` 字段保存的是原始引用：可能是数字形式的规范 ID，
//! 也可能是 slug（如 `design_auth`）。解析器在读取时把它们统一成规范 ID，
//! 并把子任务父任务的依赖传播到子任务上。存储中的引用永远不会被改写。

use crate::tasks::task::{Task, TaskPhase, is_slug};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

// ── SlugIndex ────────────────────────────────────────────────────────────────

/// slug → 规范 ID 的索引
///
/// - slug 形式的真实 ID 映射到自身
/// - 由阶段和标签拼出的别名（`<phase>_<label>`）映射到携带该阶段和标签的任务
///
/// 真实 ID 总是优先于别名；同一别名被多个任务声明时，先插入的任务胜出。
#[derive(Debug, Clone, Default)]
pub struct SlugIndex {
    entries: HashMap<String, String>,
}

impl SlugIndex {
    pub fn build<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        let mut entries = HashMap::new();

        for task in &tasks {
            if is_slug(&task.id) {
                entries.insert(task.id.clone(), task.id.clone());
            }
        }

        for task in &tasks {
            let Some(phase) = effective_phase(task) else {
                continue;
            };
            for label in &task.labels {
                if TaskPhase::from_label(label).is_some() {
                    continue;
                }
                let alias = format!("{}_{}", phase.slug(), normalize_label(label));
                match entries.get(&alias) {
                    Some(existing) if existing != &task.id => {
                        debug!(alias = %alias, owner = %existing, task = %task.id, "slug 别名已被占用，忽略");
                    }
                    Some(_) => {}
                    None => {
                        entries.insert(alias, task.id.clone());
                    }
                }
            }
        }

        Self { entries }
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.entries.get(reference).map(String::as_str)
    }

    /// 解析单个引用：命中索引则替换为规范 ID，否则原样返回
    pub fn resolve(&self, reference: &str) -> String {
        self.get(reference).unwrap_or(reference).to_string()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 显式阶段优先，否则取第一个能解析为阶段的标签
pub fn effective_phase(task: &Task) -> Option<TaskPhase> {
    task.phase
        .or_else(|| task.labels.iter().find_map(|l| TaskPhase::from_label(l)))
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

// ── DependencyResolver ───────────────────────────────────────────────────────

/// 一条解析后的依赖
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    /// 规范 ID
    pub id: String,
    /// 是否从父任务继承而来
    pub inherited: bool,
}

/// 当前任务集合上的只读解析视图，任务集合变化后需重新构建
pub struct DependencyResolver<'a> {
    tasks: HashMap<&'a str, &'a Task>,
    index: SlugIndex,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let tasks: Vec<&'a Task> = tasks.into_iter().collect();
        let index = SlugIndex::build(tasks.iter().copied());
        Self {
            tasks: tasks.into_iter().map(|t| (t.id.as_str(), t)).collect(),
            index,
        }
    }

    pub fn index(&self) -> &SlugIndex {
        &self.index
    }

    pub fn task(&self, id: &str) -> Option<&'a Task> {
        self.tasks.get(id).copied()
    }

    pub fn resolve_reference(&self, reference: &str) -> String {
        self.index.resolve(reference)
    }

    /// 任务自身声明的依赖（已解析、去重、保持声明顺序）
    pub fn own_dependencies(&self, task: &Task) -> Vec<String> {
        let mut seen = HashSet::new();
        task.dependencies
            .iter()
            .map(|r| self.resolve_reference(r))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// 有效依赖：自身依赖 + 沿父任务链继承的依赖
    ///
    /// 继承的依赖不会指回子任务自己的"家族"：自身、祖先、以及任一祖先的直接子任务。
    pub fn effective_dependencies(&self, task: &Task) -> Vec<ResolvedDependency> {
        let mut result: Vec<ResolvedDependency> = self
            .own_dependencies(task)
            .into_iter()
            .map(|id| ResolvedDependency {
                id,
                inherited: false,
            })
            .collect();

        if !task.is_subtask {
            return result;
        }

        let mut seen: HashSet<String> = result.iter().map(|d| d.id.clone()).collect();
        let mut family: HashSet<String> = HashSet::from([task.id.clone()]);
        let mut ancestors: Vec<&Task> = Vec::new();

        let mut current = task;
        while current.is_subtask {
            let Some(parent_ref) = current.parent_task_id.as_deref() else {
                break;
            };
            let parent_id = self.resolve_reference(parent_ref);
            if !family.insert(parent_id.clone()) {
                break;
            }
            let Some(parent) = self.task(&parent_id) else {
                break;
            };
            ancestors.push(parent);
            current = parent;
        }

        for ancestor in ancestors {
            for dep in self.own_dependencies(ancestor) {
                if family.contains(&dep) || self.is_child_of_any(&dep, &family) {
                    continue;
                }
                if seen.insert(dep.clone()) {
                    result.push(ResolvedDependency {
                        id: dep,
                        inherited: true,
                    });
                }
            }
        }

        result
    }

    fn is_child_of_any(&self, id: &str, family: &HashSet<String>) -> bool {
        self.task(id)
            .and_then(|t| t.parent_task_id.as_deref())
            .map(|p| family.contains(&self.resolve_reference(p)))
            .unwrap_or(false)
    }

    /// 用于资格判断的依赖集合
    pub fn resolved_dependencies(&self, task: &Task) -> BTreeSet<String> {
        self.effective_dependencies(task)
            .into_iter()
            .map(|d| d.id)
            .collect()
    }

    /// 解析后找不到对应任务的引用（悬空引用）
    pub fn dangling_dependencies(&self, task: &Task) -> Vec<String> {
        self.effective_dependencies(task)
            .into_iter()
            .filter(|d| !self.tasks.contains_key(d.id.as_str()))
            .map(|d| d.id)
            .collect()
    }

    /// 尚未满足的依赖：不存在或未完成
    pub fn unmet_dependencies(&self, task: &Task) -> Vec<String> {
        self.effective_dependencies(task)
            .into_iter()
            .filter(|d| {
                self.task(&d.id).map(|t| !t.is_done()).unwrap_or(true)
            })
            .map(|d| d.id)
            .collect()
    }

    pub fn dependencies_satisfied(&self, task: &Task) -> bool {
        self.unmet_dependencies(task).is_empty()
    }
}
