//! 基于关键词的任务类型（阶段）推断
//!
//! 只作为提示：返回置信度和候选项，绝不覆盖显式设置的阶段。

use crate::tasks::{Task, TaskPhase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const LABEL_WEIGHT: f32 = 2.0;
const PHASE_LABEL_WEIGHT: f32 = 3.0;
const NAME_WEIGHT: f32 = 1.5;
const DESCRIPTION_WEIGHT: f32 = 1.0;
/// 得分达到该值时证据强度视为饱和
const STRONG_EVIDENCE: f32 = 3.0;

fn keywords(phase: TaskPhase) -> &'static [&'static str] {
    match phase {
        TaskPhase::Design => &[
            "design", "architect", "architecture", "wireframe", "mockup", "spec",
            "specification", "research", "diagram", "prototype", "plan",
        ],
        TaskPhase::Infrastructure => &[
            "setup", "infrastructure", "infra", "configure", "provision", "database", "docker",
            "ci", "pipeline", "environment", "scaffold", "install",
        ],
        TaskPhase::Implementation => &[
            "implement", "build", "develop", "create", "code", "feature", "endpoint", "api",
            "integrate", "refactor", "add",
        ],
        TaskPhase::Testing => &[
            "test", "testing", "qa", "verify", "validate", "unit", "integration", "e2e",
            "coverage", "bug",
        ],
        TaskPhase::Documentation => &[
            "document", "documentation", "docs", "readme", "guide", "tutorial", "manual",
            "changelog",
        ],
        TaskPhase::Deployment => &[
            "deploy", "deployment", "release", "launch", "production", "rollout", "publish",
            "ship",
        ],
    }
}

/// 候选阶段及其得分占比
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCandidate {
    pub phase: TaskPhase,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeIdentification {
    pub task_id: String,
    /// 推断出的阶段，没有任何关键词命中时为 `None`
    pub phase: Option<TaskPhase>,
    /// 置信度 [0, 1]
    pub confidence: f32,
    pub alternatives: Vec<PhaseCandidate>,
    pub matched_keywords: Vec<String>,
    /// 任务上显式设置的阶段（原样保留）
    pub explicit_phase: Option<TaskPhase>,
}

impl TaskTypeIdentification {
    /// 推断结果与显式阶段是否矛盾
    pub fn conflicts_with_explicit(&self) -> bool {
        matches!((self.explicit_phase, self.phase), (Some(a), Some(b)) if a != b)
    }
}

/// 对 name + description + labels 做关键词匹配，推断任务所属阶段
pub fn identify_task_type(task: &Task) -> TaskTypeIdentification {
    let mut scores = [0.0f32; 6];
    let mut matched: Vec<String> = Vec::new();

    let label_tokens: HashSet<String> = task.labels.iter().flat_map(|l| tokenize(l)).collect();
    for label in &task.labels {
        if let Some(phase) = TaskPhase::from_label(label) {
            scores[index(phase)] += PHASE_LABEL_WEIGHT;
            matched.push(label.to_lowercase());
        }
    }

    let sources = [
        (label_tokens, LABEL_WEIGHT),
        (tokenize(&task.name), NAME_WEIGHT),
        (tokenize(&task.description), DESCRIPTION_WEIGHT),
    ];
    for (tokens, weight) in &sources {
        for token in tokens {
            for phase in TaskPhase::ALL {
                if keywords(phase).iter().any(|kw| keyword_matches(token, kw)) {
                    scores[index(phase)] += weight;
                    if !matched.contains(token) {
                        matched.push(token.clone());
                    }
                }
            }
        }
    }

    let total: f32 = scores.iter().sum();
    if total <= 0.0 {
        return TaskTypeIdentification {
            task_id: task.id.clone(),
            phase: None,
            confidence: 0.0,
            alternatives: Vec::new(),
            matched_keywords: Vec::new(),
            explicit_phase: task.phase,
        };
    }

    // 并列时取更早的阶段
    let mut best = TaskPhase::Design;
    for phase in TaskPhase::ALL {
        if scores[index(phase)] > scores[index(best)] {
            best = phase;
        }
    }
    let best_score = scores[index(best)];
    let strength = (best_score / STRONG_EVIDENCE).min(1.0);
    let confidence = (best_score / total) * strength;

    let mut alternatives: Vec<PhaseCandidate> = TaskPhase::ALL
        .iter()
        .filter(|p| **p != best && scores[index(**p)] > 0.0)
        .map(|p| PhaseCandidate {
            phase: *p,
            score: scores[index(*p)] / total,
        })
        .collect();
    alternatives.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    matched.sort();
    TaskTypeIdentification {
        task_id: task.id.clone(),
        phase: Some(best),
        confidence,
        alternatives,
        matched_keywords: matched,
        explicit_phase: task.phase,
    }
}

fn index(phase: TaskPhase) -> usize {
    usize::from(phase.order() - 1)
}

/// 完全相等，或较长关键词作为前缀（`tests`、`deployed`、`implementing`）
fn keyword_matches(token: &str, keyword: &str) -> bool {
    token == keyword || (keyword.len() >= 4 && token.starts_with(keyword))
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(|s| s.to_lowercase())
        .collect()
}
