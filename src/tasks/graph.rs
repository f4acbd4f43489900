//! 依赖图
//!
//! [`DependencyGraph`] 是任务集合的派生视图：每次从当前任务集合重新构建，
//! 从不单独修改。边的方向是 `from`（前置任务）→ `to`（依赖它的任务），
//! 因此拓扑序中 `from` 总在 `to` 之前。

use crate::error::{GraphError, Result};
use crate::tasks::resolver::{DependencyResolver, effective_phase};
use crate::tasks::task::{DependencyType, Task, is_slug};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// 一条解析后的依赖边
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// 前置任务
    pub from: String,
    /// 依赖方
    pub to: String,
    pub dependency_type: DependencyType,
    /// 是否由父任务传播而来
    pub inherited: bool,
}

/// 解析不到任何任务的依赖引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub task_id: String,
    pub reference: String,
}

/// 关键路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPath {
    pub tasks: Vec<String>,
    /// 边数，或按工时加权时的总工时
    pub length: f64,
    pub weighted_by_duration: bool,
}

/// 可序列化的依赖图快照，供外部查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Task>,
    pub edges: Vec<DependencyEdge>,
    pub dangling: Vec<DanglingReference>,
    pub has_cycle: bool,
    pub execution_order: Option<Vec<String>>,
    pub critical_path: Option<CriticalPath>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum VisitState {
    Visiting,
    Visited,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, Task>,
    /// 插入顺序，保证输出确定
    order: Vec<String>,
    edges: Vec<DependencyEdge>,
    /// 前置任务 → 依赖方
    adjacency: HashMap<String, Vec<String>>,
    /// 依赖方 → 前置任务
    reverse_adjacency: HashMap<String, Vec<String>>,
    dangling: Vec<DanglingReference>,
}

impl DependencyGraph {
    /// 从任务集合构建依赖图（重复 ID 保留首次出现的位置、最后一次的内容）
    pub fn build<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, &Task> = HashMap::new();
        for task in tasks {
            if latest.insert(task.id.clone(), task).is_none() {
                order.push(task.id.clone());
            }
        }
        let ordered: Vec<&Task> = order.iter().filter_map(|id| latest.get(id).copied()).collect();

        let resolver = DependencyResolver::new(ordered.iter().copied());
        let mut edges = Vec::new();
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut dangling = Vec::new();

        for id in &order {
            adjacency.insert(id.clone(), Vec::new());
            reverse_adjacency.insert(id.clone(), Vec::new());
        }

        for task in &ordered {
            for dep in resolver.effective_dependencies(task) {
                match resolver.task(&dep.id) {
                    Some(dep_task) => {
                        edges.push(DependencyEdge {
                            from: dep.id.clone(),
                            to: task.id.clone(),
                            dependency_type: classify_edge(dep_task, task, dep.inherited),
                            inherited: dep.inherited,
                        });
                        adjacency
                            .entry(dep.id.clone())
                            .or_default()
                            .push(task.id.clone());
                        reverse_adjacency
                            .entry(task.id.clone())
                            .or_default()
                            .push(dep.id);
                    }
                    None => dangling.push(DanglingReference {
                        task_id: task.id.clone(),
                        reference: dep.id,
                    }),
                }
            }
        }

        let nodes = ordered
            .into_iter()
            .map(|t| (t.id.clone(), t.clone()))
            .collect();

        Self {
            nodes,
            order,
            edges,
            adjacency,
            reverse_adjacency,
            dangling,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id)
    }

    /// 按插入顺序遍历所有任务
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn dangling(&self) -> &[DanglingReference] {
        &self.dangling
    }

    /// 直接前置任务
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.reverse_adjacency
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 直接依赖方
    pub fn dependents(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 尚未完成的直接依赖方数量
    pub fn open_dependents(&self, id: &str) -> usize {
        self.dependents(id)
            .iter()
            .filter(|d| {
                self.task(d).map(|t| !t.is_done()).unwrap_or(false)
            })
            .count()
    }

    /// 所有传递前置任务（BFS，不含自身）
    pub fn all_transitive_dependencies(&self, id: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies(current) {
                if dep != id && result.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
        result
    }

    /// 检测循环依赖，返回所有循环路径
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashMap<&str, VisitState> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        for id in &self.order {
            if !visited.contains_key(id.as_str()) {
                self.dfs_detect_cycle(id, &mut visited, &mut path, &mut cycles);
            }
        }

        cycles
    }

    pub fn has_cycle(&self) -> bool {
        !self.detect_cycles().is_empty()
    }

    fn dfs_detect_cycle<'g>(
        &'g self,
        id: &'g str,
        visited: &mut HashMap<&'g str, VisitState>,
        path: &mut Vec<&'g str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(id, VisitState::Visiting);
        path.push(id);

        for dep in self.dependencies(id) {
            match visited.get(dep.as_str()).copied() {
                Some(VisitState::Visiting) => {
                    if let Some(start) = path.iter().position(|p| *p == dep) {
                        cycles.push(path[start..].iter().map(|s| s.to_string()).collect());
                    }
                }
                Some(VisitState::Visited) => {}
                None => self.dfs_detect_cycle(dep, visited, path, cycles),
            }
        }

        path.pop();
        visited.insert(id, VisitState::Visited);
    }

    /// 拓扑执行顺序（Kahn 算法，同层按插入顺序）
    pub fn execution_order(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.detect_cycles().into_iter().next() {
            return Err(GraphError::CircularDependency(cycle).into());
        }

        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies(id).len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id.as_str()) == Some(&0))
            .map(String::as_str)
            .collect();

        let mut result = Vec::with_capacity(self.order.len());
        while let Some(id) = queue.pop_front() {
            result.push(id.to_string());
            for dependent in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        Ok(result)
    }

    /// 关键路径：按拓扑序求最长路径
    ///
    /// 只要有任务带工时预估，就按任务工时加权（未预估的任务计 1）；否则每条边权重为 1。
    pub fn critical_path(&self) -> Result<CriticalPath> {
        let order = self.execution_order()?;
        let weighted = self.nodes.values().any(|t| t.estimated_hours.is_some());
        let weight = |id: &str| -> f64 {
            if weighted {
                self.task(id)
                    .and_then(|t| t.estimated_hours)
                    .unwrap_or(1.0)
            } else {
                0.0
            }
        };
        let edge_weight = if weighted { 0.0 } else { 1.0 };

        let mut dist: HashMap<&str, f64> = HashMap::new();
        let mut prev: HashMap<&str, &str> = HashMap::new();

        for id in &order {
            let mut best = weight(id);
            for dep in self.dependencies(id) {
                let candidate = dist.get(dep.as_str()).copied().unwrap_or(0.0) + edge_weight + weight(id);
                if candidate > best {
                    best = candidate;
                    prev.insert(id.as_str(), dep.as_str());
                }
            }
            dist.insert(id.as_str(), best);
        }

        let mut end: Option<&str> = None;
        for id in &order {
            let d = dist.get(id.as_str()).copied().unwrap_or(0.0);
            if end.map(|e| d > dist[e]).unwrap_or(true) {
                // 取第一个最大值
                end = Some(id.as_str());
            }
        }

        let Some(end) = end else {
            return Ok(CriticalPath {
                tasks: Vec::new(),
                length: 0.0,
                weighted_by_duration: weighted,
            });
        };

        let mut tasks = vec![end.to_string()];
        let mut cursor = end;
        while let Some(&p) = prev.get(cursor) {
            tasks.push(p.to_string());
            cursor = p;
        }
        tasks.reverse();

        Ok(CriticalPath {
            tasks,
            length: dist[end],
            weighted_by_duration: weighted,
        })
    }

    /// 生成依赖图的可视化（Mermaid 格式）
    pub fn to_mermaid(&self) -> String {
        let mut mermaid = String::from("graph TD\n");
        for task in self.tasks() {
            mermaid.push_str(&format!(
                "  {}[\"{} ({})\"]\n",
                mermaid_id(&task.id),
                task.id,
                task.status
            ));
        }
        for edge in &self.edges {
            let arrow = if edge.inherited { "-.->" } else { "-->" };
            mermaid.push_str(&format!(
                "  {} {} {}\n",
                mermaid_id(&edge.from),
                arrow,
                mermaid_id(&edge.to)
            ));
        }
        mermaid
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.tasks().cloned().collect(),
            edges: self.edges.clone(),
            dangling: self.dangling.clone(),
            has_cycle: self.has_cycle(),
            execution_order: self.execution_order().ok(),
            critical_path: self.critical_path().ok(),
        }
    }
}

fn mermaid_id(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("t_{}", safe)
}

/// 依赖边分类，仅用于诊断
fn classify_edge(dep: &Task, task: &Task, inherited: bool) -> DependencyType {
    if inherited {
        return DependencyType::Technical;
    }
    if dep.labels.iter().any(|l| l.eq_ignore_ascii_case("global")) {
        return DependencyType::Global;
    }
    if dep
        .labels
        .iter()
        .any(|l| matches!(l.to_lowercase().as_str(), "data" | "database" | "schema"))
    {
        return DependencyType::Data;
    }
    if is_slug(&dep.id) {
        return DependencyType::Feature;
    }
    match (effective_phase(dep), effective_phase(task)) {
        (Some(a), Some(b)) if a < b => DependencyType::Phase,
        _ => DependencyType::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::task::TaskPhase;

    fn create_task(id: &str, dependencies: Vec<&str>) -> Task {
        Task::new(id, format!("Task {}", id)).with_dependencies(dependencies)
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_adjacency_queries() {
        let tasks = vec![
            create_task("1", vec![]),
            create_task("2", vec!["1"]),
            create_task("3", vec!["1", "2"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.dependencies("3"), &["1".to_string(), "2".to_string()]);
        assert_eq!(graph.dependents("1"), &["2".to_string(), "3".to_string()]);
        assert_eq!(graph.edges().len(), 3);
        assert!(graph.dependencies("404").is_empty());
    }

    #[test]
    fn test_transitive_dependencies_exclude_self() {
        let tasks = vec![
            create_task("1", vec![]),
            create_task("2", vec!["1"]),
            create_task("3", vec!["2"]),
            create_task("4", vec![]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let deps = graph.all_transitive_dependencies("3");
        assert_eq!(deps, HashSet::from(["1".to_string(), "2".to_string()]));
        assert!(graph.all_transitive_dependencies("1").is_empty());
    }

    #[test]
    fn test_no_circular_dependencies() {
        let tasks = vec![
            create_task("task1", vec![]),
            create_task("task2", vec!["task1"]),
            create_task("task3", vec!["task2"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert!(graph.detect_cycles().is_empty(), "应该没有循环依赖");
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_simple_circular_dependency() {
        let tasks = vec![
            create_task("task1", vec!["task2"]),
            create_task("task2", vec!["task1"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1, "应该检测到一个循环");
        assert!(cycles[0].contains(&"task1".to_string()));
        assert!(cycles[0].contains(&"task2".to_string()));
    }

    #[test]
    fn test_self_dependency() {
        let tasks = vec![create_task("task1", vec!["task1"])];
        let graph = DependencyGraph::build(&tasks);
        let cycles = graph.detect_cycles();
        assert_eq!(cycles, vec![vec!["task1".to_string()]], "自依赖循环应该只包含一个任务");
    }

    #[test]
    fn test_multiple_circular_dependencies() {
        let tasks = vec![
            create_task("task1", vec!["task2"]),
            create_task("task2", vec!["task1"]),
            create_task("task3", vec!["task4"]),
            create_task("task4", vec!["task3"]),
            create_task("task5", vec![]),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.detect_cycles().len(), 2, "应该检测到两个循环");
    }

    #[test]
    fn test_execution_order_respects_edges() {
        let tasks = vec![
            create_task("c", vec!["b"]),
            create_task("b", vec!["a"]),
            create_task("a", vec![]),
            create_task("d", vec!["a", "c"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let order = graph.execution_order().unwrap();
        assert_eq!(order.len(), 4, "应该包含所有任务");
        for edge in graph.edges() {
            assert!(
                position(&order, &edge.from) < position(&order, &edge.to),
                "{} 应该在 {} 之前",
                edge.from,
                edge.to
            );
        }
    }

    #[test]
    fn test_execution_order_with_cycle_fails() {
        let tasks = vec![
            create_task("1", vec!["3"]),
            create_task("2", vec!["1"]),
            create_task("3", vec!["2"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let err = graph.execution_order().unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn test_critical_path_unweighted() {
        let tasks = vec![
            create_task("1", vec![]),
            create_task("2", vec!["1"]),
            create_task("3", vec!["2"]),
            create_task("4", vec!["1"]),
        ];
        let graph = DependencyGraph::build(&tasks);
        let path = graph.critical_path().unwrap();
        assert_eq!(path.tasks, vec!["1", "2", "3"]);
        assert_eq!(path.length, 2.0);
        assert!(!path.weighted_by_duration);
    }

    #[test]
    fn test_critical_path_weighted_by_duration() {
        let tasks = vec![
            create_task("1", vec![]).with_estimate(2.0),
            create_task("2", vec!["1"]).with_estimate(1.0),
            create_task("3", vec!["2"]).with_estimate(1.0),
            create_task("4", vec!["1"]).with_estimate(8.0),
        ];
        let graph = DependencyGraph::build(&tasks);
        let path = graph.critical_path().unwrap();
        assert_eq!(path.tasks, vec!["1", "4"]);
        assert_eq!(path.length, 10.0);
        assert!(path.weighted_by_duration);
    }

    #[test]
    fn test_critical_path_empty_graph() {
        let graph = DependencyGraph::build(&Vec::<Task>::new());
        let path = graph.critical_path().unwrap();
        assert!(path.tasks.is_empty());
        assert_eq!(path.length, 0.0);
    }

    #[test]
    fn test_dangling_references_recorded() {
        let tasks = vec![create_task("1", vec!["missing"])];
        let graph = DependencyGraph::build(&tasks);
        assert!(graph.edges().is_empty());
        assert_eq!(
            graph.dangling(),
            &[DanglingReference {
                task_id: "1".to_string(),
                reference: "missing".to_string()
            }]
        );
    }

    #[test]
    fn test_edge_classification() {
        let tasks = vec![
            Task::new("design_core", "Design").with_phase(TaskPhase::Design),
            Task::new("1", "DB").with_labels(["database"]),
            Task::new("2", "Infra").with_phase(TaskPhase::Infrastructure),
            Task::new("3", "Impl")
                .with_phase(TaskPhase::Implementation)
                .with_dependencies(["design_core", "1", "2"]),
            Task::new("3.1", "Impl part").subtask_of("3"),
        ];
        let graph = DependencyGraph::build(&tasks);
        let kind = |from: &str, to: &str| {
            graph
                .edges()
                .iter()
                .find(|e| e.from == from && e.to == to)
                .map(|e| e.dependency_type)
        };
        assert_eq!(kind("design_core", "3"), Some(DependencyType::Feature));
        assert_eq!(kind("1", "3"), Some(DependencyType::Data));
        assert_eq!(kind("2", "3"), Some(DependencyType::Phase));
        assert_eq!(kind("2", "3.1"), Some(DependencyType::Technical));
    }

    #[test]
    fn test_visualize_dependencies() {
        let tasks = vec![create_task("task1", vec![]), create_task("task2", vec!["task1"])];
        let mermaid = DependencyGraph::build(&tasks).to_mermaid();
        assert!(mermaid.contains("graph TD"), "应该包含 Mermaid 图表类型");
        assert!(mermaid.contains("t_task1 --> t_task2"), "应该包含箭头");
    }

    #[test]
    fn test_snapshot_serializes() {
        let tasks = vec![create_task("1", vec![]), create_task("2", vec!["1"])];
        let snapshot = DependencyGraph::build(&tasks).snapshot();
        assert_eq!(snapshot.execution_order, Some(vec!["1".to_string(), "2".to_string()]));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["edges"][0]["dependency_type"], "MANUAL");
    }
}
