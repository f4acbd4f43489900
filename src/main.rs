//! 调度引擎演示宿主
//!
//! 加载任务（JSON 文件或内置示例计划），注册若干模拟 Agent 并发领取、完成任务，
//! 同时按固定间隔回收过期租约。结束后打印进度摘要和僵局状态。
//!
//! # 运行
//! ```bash
//! cargo run -- --agents 3
//! cargo run -- --tasks ./tasks.json --config ./engine.yaml
//! RUST_LOG=task_dispatch=debug cargo run
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use task_dispatch::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "task-dispatch", about = "多 Agent 任务分配引擎演示")]
struct Args {
    /// 任务文件（JSON 数组），不指定则使用内置示例计划
    #[arg(long, env = "TASK_DISPATCH_TASKS")]
    tasks: Option<PathBuf>,

    /// 引擎配置文件（YAML），不指定则读取环境变量
    #[arg(long, env = "TASK_DISPATCH_CONFIG")]
    config: Option<String>,

    /// 模拟 Agent 数量
    #[arg(long, default_value_t = 3)]
    agents: usize,

    /// 覆盖租约时长（秒）
    #[arg(long)]
    lease_secs: Option<u64>,

    /// 租约回收间隔（毫秒）
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,

    /// 每个任务的模拟执行时间（毫秒）
    #[arg(long, default_value_t = 100)]
    work_ms: u64,

    /// Agent 连续空闲多少轮后退出
    #[arg(long, default_value_t = 20)]
    max_idle: usize,
}

// ── 入口 ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> task_dispatch::error::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "task_dispatch=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(secs) = args.lease_secs {
        config = config.with_lease_secs(secs);
    }

    let store: Arc<dyn TaskStore> = match &args.tasks {
        Some(path) => Arc::new(FileTaskStore::new(path)?),
        None => Arc::new(InMemoryTaskStore::with_tasks(sample_plan())),
    };
    let scheduler = Arc::new(AssignmentScheduler::new(&config, store, Arc::new(SystemClock)).await?);

    let report = scheduler.validate_project().await;
    for issue in report.errors.iter().chain(report.warnings.iter()) {
        warn!(task = %issue.task_id, "{}", issue.message);
    }

    let token = CancellationToken::new();
    let ticker = tokio::spawn(reclaim_loop(
        scheduler.clone(),
        Duration::from_millis(args.tick_ms),
        token.clone(),
    ));

    let agents: Vec<String> = (0..args.agents)
        .map(|i| format!("agent-{}-{}", i + 1, &uuid::Uuid::new_v4().to_string()[..8]))
        .collect();
    for agent in &agents {
        scheduler.register_agent(agent).await;
    }

    let workers = agents.into_iter().map(|agent| {
        run_agent(
            scheduler.clone(),
            agent,
            Duration::from_millis(args.work_ms),
            Duration::from_millis(args.tick_ms),
            args.max_idle,
        )
    });
    let completed: usize = futures::future::join_all(workers).await.into_iter().sum();

    token.cancel();
    if let Err(e) = ticker.await {
        warn!(error = %e, "租约回收任务异常退出");
    }

    println!("\n📊 {}", scheduler.summary().await);
    println!("✅ 本次共完成 {} 个任务", completed);

    let status = scheduler.get_gridlock_status().await;
    println!("🚦 僵局状态: {:?} ({:?})", status.state, status.severity);
    if let Some(diagnosis) = status.diagnosis {
        println!("   {}", diagnosis.summary);
        for rec in diagnosis.recommendations {
            println!("   - {}", rec);
        }
    }
    Ok(())
}

// ── 租约回收 ──────────────────────────────────────────────────────────────────

async fn reclaim_loop(scheduler: Arc<AssignmentScheduler>, every: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                match scheduler.reclaim_expired_leases(SystemClock.now()).await {
                    Ok(0) => {}
                    Ok(n) => info!(reclaimed = n, "⌛ 已回收过期租约"),
                    Err(e) => warn!(error = %e, "租约回收失败"),
                }
            }
        }
    }
}

// ── 模拟 Agent ────────────────────────────────────────────────────────────────

/// 领取任务 → 模拟执行 → 上报完成，直到没有剩余任务或连续空闲过久，返回完成数
async fn run_agent(
    scheduler: Arc<AssignmentScheduler>,
    agent: String,
    work: Duration,
    backoff: Duration,
    max_idle: usize,
) -> usize {
    let mut completed = 0;
    let mut idle = 0;
    loop {
        let assignment = match scheduler.request_next_task(&agent).await {
            Ok(a) => a,
            Err(e) => {
                warn!(agent = %agent, error = %e, "申请任务失败");
                break;
            }
        };

        match assignment {
            Assignment::Assigned(assigned) => {
                idle = 0;
                tokio::time::sleep(work).await;
                let result = scheduler
                    .report_progress(
                        &agent,
                        &assigned.task.id,
                        ProgressStatus::Completed,
                        100,
                        Some("simulated run finished"),
                    )
                    .await;
                match result {
                    Ok(_) => completed += 1,
                    Err(e) => warn!(agent = %agent, error = %e, "上报进度失败"),
                }
            }
            Assignment::NoneAvailable {
                reason: NoneAvailableReason::NoTasks,
            } => break,
            Assignment::NoneAvailable { reason } => {
                idle += 1;
                if idle >= max_idle {
                    warn!(agent = %agent, reason = %reason, "长时间没有可分配任务，Agent 退出");
                    break;
                }
                tokio::time::sleep(backoff).await;
            }
        }
    }
    completed
}

// ── 示例计划 ──────────────────────────────────────────────────────────────────

fn sample_plan() -> Vec<Task> {
    vec![
        Task::new("1", "Design data model")
            .with_phase(TaskPhase::Design)
            .with_labels(["schema"])
            .with_estimate(2.0),
        Task::new("2", "Design auth flow")
            .with_phase(TaskPhase::Design)
            .with_labels(["auth"])
            .with_estimate(1.5),
        Task::new("3", "Provision database")
            .with_phase(TaskPhase::Infrastructure)
            .with_dependencies(["design_schema"])
            .with_estimate(1.0),
        Task::new("4", "Implement auth service")
            .with_phase(TaskPhase::Implementation)
            .with_dependencies(["design_auth", "3"])
            .with_priority(8)
            .with_estimate(4.0),
        Task::new("5", "Token refresh endpoint")
            .subtask_of("4")
            .with_estimate(1.0),
        Task::new("6", "Integration tests")
            .with_phase(TaskPhase::Testing)
            .with_dependencies(["4"])
            .with_estimate(2.0),
        Task::new("7", "API documentation")
            .with_phase(TaskPhase::Documentation)
            .with_dependencies(["4"])
            .with_priority(3),
        Task::new("8", "Deploy to staging")
            .with_phase(TaskPhase::Deployment)
            .with_dependencies(["6", "7"]),
    ]
}
