//! 测试基础设施
//!
//! 在不依赖真实时间和外部存储的情况下测试调度器。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`ManualClock`] | 手动推进的时钟，用于测试租约过期和僵局滑动窗口 |
//! | [`RecordingTaskStore`] | 内存存储，记录每次回写，可脚本化写入失败 |
//!
//! # 使用示例
//!
//! ```rust
//! use task_dispatch::config::EngineConfig;
//! use task_dispatch::scheduler::AssignmentScheduler;
//! use task_dispatch::tasks::Task;
//! use task_dispatch::testing::{ManualClock, RecordingTaskStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> task_dispatch::error::Result<()> {
//! let clock = Arc::new(ManualClock::new(1_000));
//! let store = Arc::new(RecordingTaskStore::with_tasks(vec![Task::new("1", "Design API")]));
//! let scheduler =
//!     AssignmentScheduler::new(&EngineConfig::default(), store.clone(), clock.clone()).await?;
//!
//! scheduler.register_agent("agent-1").await;
//! let assignment = scheduler.request_next_task("agent-1").await?;
//! assert!(assignment.task().is_some());
//! assert_eq!(store.save_count(), 1);
//!
//! clock.advance(3_600);
//! assert_eq!(scheduler.reclaim_expired_leases(clock.now_secs()).await?, 1);
//! # Ok(())
//! # }
//! ```

mod manual_clock;
mod recording_store;

pub use manual_clock::ManualClock;
pub use recording_store::RecordingTaskStore;
