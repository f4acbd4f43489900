//! 任务与依赖图模型
//!
//! - [`task`]：任务、阶段、状态等数据结构
//! - [`resolver`]：slug 索引与依赖解析（含父任务依赖传播）
//! - [`graph`]：派生的依赖图及其只读查询（环检测、拓扑序、关键路径）
//! - [`manager`]：保持插入顺序的任务集合

pub mod graph;
mod manager;
pub mod resolver;
pub mod task;

pub use graph::{CriticalPath, DanglingReference, DependencyEdge, DependencyGraph, GraphSnapshot};
pub use manager::TaskManager;
pub use resolver::{DependencyResolver, ResolvedDependency, SlugIndex};
pub use task::{DependencyType, Task, TaskPhase, TaskStatus};
