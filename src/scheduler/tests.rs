use super::*;
use crate::error::EngineError;
use crate::scheduler::gridlock::GridlockSeverity;
use crate::tasks::TaskPhase;
use crate::testing::{ManualClock, RecordingTaskStore};
use std::collections::HashSet;

const START: u64 = 1_000;

async fn setup_with(
    tasks: Vec<Task>,
    config: EngineConfig,
) -> (Arc<AssignmentScheduler>, Arc<ManualClock>, Arc<RecordingTaskStore>) {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(RecordingTaskStore::with_tasks(tasks));
    let scheduler = AssignmentScheduler::new(&config, store.clone(), clock.clone())
        .await
        .unwrap();
    (Arc::new(scheduler), clock, store)
}

async fn setup(tasks: Vec<Task>) -> (Arc<AssignmentScheduler>, Arc<ManualClock>, Arc<RecordingTaskStore>) {
    setup_with(tasks, EngineConfig::default()).await
}

async fn register(scheduler: &AssignmentScheduler, agents: &[&str]) {
    for agent in agents {
        scheduler.register_agent(agent).await;
    }
}

async fn next_id(scheduler: &AssignmentScheduler, agent: &str) -> Option<String> {
    scheduler
        .request_next_task(agent)
        .await
        .unwrap()
        .task()
        .map(|t| t.task.id.clone())
}

async fn complete(scheduler: &AssignmentScheduler, agent: &str, task_id: &str) {
    scheduler
        .report_progress(agent, task_id, ProgressStatus::Completed, 100, None)
        .await
        .unwrap();
}

fn reason(assignment: &Assignment) -> Option<NoneAvailableReason> {
    match assignment {
        Assignment::NoneAvailable { reason } => Some(*reason),
        Assignment::Assigned(_) => None,
    }
}

// ── 分配 ──────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_double_assign() {
    let tasks: Vec<Task> = (1..=20).map(|i| Task::new(i.to_string(), format!("task {i}"))).collect();
    let (scheduler, _, _) = setup(tasks).await;
    let agents: Vec<String> = (0..50).map(|i| format!("agent-{i}")).collect();
    for agent in &agents {
        scheduler.register_agent(agent).await;
    }

    let requests = agents.iter().map(|agent| {
        let scheduler = scheduler.clone();
        let agent = agent.clone();
        tokio::spawn(async move { scheduler.request_next_task(&agent).await.unwrap() })
    });
    let results = futures::future::join_all(requests).await;

    let assigned: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.unwrap().task().map(|t| t.task.id.clone()))
        .collect();
    let unique: HashSet<&String> = assigned.iter().collect();
    assert_eq!(assigned.len(), 20, "每个任务都应被分配一次");
    assert_eq!(unique.len(), assigned.len(), "同一任务不能分配给两个 Agent");
}

#[tokio::test]
async fn test_unknown_agent_is_rejected() {
    let (scheduler, _, _) = setup(vec![Task::new("1", "one")]).await;
    let err = scheduler.request_next_task("stranger").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Assignment(AssignmentError::UnknownAgent(_))
    ));
}

#[tokio::test]
async fn test_dependencies_must_be_done() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "Schema"),
        Task::new("2", "API").with_dependencies(["1"]),
    ])
    .await;
    register(&scheduler, &["a1", "a2"]).await;

    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("1"));
    let second = scheduler.request_next_task("a2").await.unwrap();
    assert_eq!(reason(&second), Some(NoneAvailableReason::AllBlocked));

    complete(&scheduler, "a1", "1").await;
    let assigned = scheduler.request_next_task("a2").await.unwrap();
    let assigned = assigned.task().unwrap();
    assert_eq!(assigned.task.id, "2");
    assert_eq!(assigned.resolved_dependencies, vec!["1".to_string()]);
}

#[tokio::test]
async fn test_subtask_waits_for_parent_dependencies() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "Design"),
        Task::new("2", "Feature").with_dependencies(["1"]),
        Task::new("3", "Feature part").subtask_of("2"),
    ])
    .await;
    register(&scheduler, &["a1", "a2"]).await;

    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("1"));
    assert_eq!(next_id(&scheduler, "a2").await, None, "子任务继承父任务的依赖");

    complete(&scheduler, "a1", "1").await;
    let mut got = HashSet::new();
    got.extend(next_id(&scheduler, "a1").await);
    got.extend(next_id(&scheduler, "a2").await);
    assert_eq!(got, HashSet::from(["2".to_string(), "3".to_string()]));
}

#[tokio::test]
async fn test_slug_dependency_resolves_to_canonical_id() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "Auth design")
            .with_phase(TaskPhase::Design)
            .with_labels(["auth"]),
        Task::new("2", "Auth impl")
            .with_phase(TaskPhase::Implementation)
            .with_dependencies(["design_auth"]),
    ])
    .await;
    register(&scheduler, &["a1"]).await;

    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("1"));
    complete(&scheduler, "a1", "1").await;
    let assignment = scheduler.request_next_task("a1").await.unwrap();
    let assigned = assignment.task().unwrap();
    assert_eq!(assigned.task.id, "2");
    assert_eq!(assigned.resolved_dependencies, vec!["1".to_string()]);
    assert_eq!(
        assigned.task.dependencies,
        vec!["design_auth".to_string()],
        "存储的原始引用不应被改写"
    );
}

#[tokio::test]
async fn test_end_to_end_design_then_parallel_implementation() {
    let (scheduler, _, _) = setup(vec![
        Task::new("D", "Design").with_phase(TaskPhase::Design),
        Task::new("A", "Impl A")
            .with_phase(TaskPhase::Implementation)
            .with_dependencies(["D"]),
        Task::new("B", "Impl B")
            .with_phase(TaskPhase::Implementation)
            .with_dependencies(["D"]),
    ])
    .await;
    register(&scheduler, &["a1", "a2"]).await;

    let (r1, r2) = tokio::join!(
        scheduler.request_next_task("a1"),
        scheduler.request_next_task("a2")
    );
    let results = [r1.unwrap(), r2.unwrap()];
    let assigned: Vec<&AssignedTask> = results.iter().filter_map(|r| r.task()).collect();
    assert_eq!(assigned.len(), 1, "D 完成前只有一个 Agent 能拿到任务");
    assert_eq!(assigned[0].task.id, "D");
    let holder = assigned[0].task.assigned_to.clone().unwrap();

    complete(&scheduler, &holder, "D").await;

    let (r1, r2) = tokio::join!(
        scheduler.request_next_task("a1"),
        scheduler.request_next_task("a2")
    );
    let ids: HashSet<String> = [r1.unwrap(), r2.unwrap()]
        .iter()
        .filter_map(|r| r.task().map(|t| t.task.id.clone()))
        .collect();
    assert_eq!(ids, HashSet::from(["A".to_string(), "B".to_string()]));
}

// ── 平局规则 ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_higher_priority_wins() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "low").with_priority(2),
        Task::new("2", "high").with_priority(9),
    ])
    .await;
    register(&scheduler, &["a1"]).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_earlier_phase_wins_and_unphased_sorts_last() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "no phase"),
        Task::new("2", "tests").with_phase(TaskPhase::Testing),
        Task::new("3", "design").with_labels(["design"]),
    ])
    .await;
    register(&scheduler, &["a1", "a2", "a3"]).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("3"));
    assert_eq!(next_id(&scheduler, "a2").await.as_deref(), Some("2"));
    assert_eq!(next_id(&scheduler, "a3").await.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_more_open_dependents_wins() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "leaf"),
        Task::new("2", "hub"),
        Task::new("3", "needs hub").with_dependencies(["2"]),
        Task::new("4", "needs hub too").with_dependencies(["2"]),
    ])
    .await;
    register(&scheduler, &["a1", "a2"]).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("2"));
    assert_eq!(next_id(&scheduler, "a2").await.as_deref(), Some("1"));
}

// ── 校验错误 ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cycle_blocks_only_cycle_members() {
    let (scheduler, _, _) = setup(vec![
        Task::new("a", "A").with_dependencies(["b"]),
        Task::new("b", "B").with_dependencies(["a"]),
        Task::new("c", "C"),
    ])
    .await;
    register(&scheduler, &["a1", "a2"]).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("c"));
    let none = scheduler.request_next_task("a2").await.unwrap();
    assert_eq!(reason(&none), Some(NoneAvailableReason::AllBlocked));
}

#[tokio::test]
async fn test_invalid_phase_order_blocks_dependent() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "tests")
            .with_phase(TaskPhase::Testing)
            .with_status(TaskStatus::Done),
        Task::new("2", "design")
            .with_phase(TaskPhase::Design)
            .with_dependencies(["1"]),
    ])
    .await;
    register(&scheduler, &["a1"]).await;
    let none = scheduler.request_next_task("a1").await.unwrap();
    assert_eq!(reason(&none), Some(NoneAvailableReason::AllBlocked));

    let report = scheduler.validate_project().await;
    assert!(!report.is_valid);
    assert_eq!(report.errors[0].task_id, "2");
}

#[tokio::test]
async fn test_dangling_reference_is_not_assignable() {
    let (scheduler, _, _) = setup(vec![Task::new("1", "orphan").with_dependencies(["ghost_task"])]).await;
    register(&scheduler, &["a1"]).await;
    let none = scheduler.request_next_task("a1").await.unwrap();
    assert_eq!(reason(&none), Some(NoneAvailableReason::AllBlocked));
    let report = scheduler.validate_project().await;
    assert!(report.is_valid, "悬空引用只是警告");
    assert_eq!(report.warnings.len(), 1);
}

// ── NoneAvailable 原因 ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_none_available_reasons() {
    let (empty, _, _) = setup(vec![]).await;
    register(&empty, &["a1"]).await;
    let r = empty.request_next_task("a1").await.unwrap();
    assert_eq!(reason(&r), Some(NoneAvailableReason::NoTasks));

    let (scheduler, _, _) = setup(vec![Task::new("1", "only")]).await;
    register(&scheduler, &["a1", "a2"]).await;
    next_id(&scheduler, "a1").await;
    let r = scheduler.request_next_task("a2").await.unwrap();
    assert_eq!(reason(&r), Some(NoneAvailableReason::AllAssigned));

    complete(&scheduler, "a1", "1").await;
    let r = scheduler.request_next_task("a2").await.unwrap();
    assert_eq!(reason(&r), Some(NoneAvailableReason::NoTasks));
}

// ── 进度上报 ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_completed_clears_assignment() {
    let (scheduler, _, store) = setup(vec![Task::new("1", "one")]).await;
    register(&scheduler, &["a1"]).await;
    next_id(&scheduler, "a1").await;

    let task = scheduler
        .report_progress("a1", "1", ProgressStatus::Completed, 40, Some("merged"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.progress, 100);
    assert!(task.assigned_to.is_none());
    assert!(task.lease_expires_at.is_none());
    assert_eq!(task.last_message.as_deref(), Some("merged"));
    assert_eq!(store.last_saved("1").unwrap().status, TaskStatus::Done);
}

#[tokio::test]
async fn test_failure_policy_block_and_retry() {
    let (blocking, _, _) = setup(vec![Task::new("1", "one")]).await;
    register(&blocking, &["a1"]).await;
    next_id(&blocking, "a1").await;
    let task = blocking
        .report_progress("a1", "1", ProgressStatus::Failed, 10, Some("tests red"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.assigned_to.is_none());

    let config = EngineConfig::default().with_failure_policy(FailurePolicy::Retry);
    let (retrying, _, _) = setup_with(vec![Task::new("1", "one")], config).await;
    register(&retrying, &["a1", "a2"]).await;
    next_id(&retrying, "a1").await;
    let task = retrying
        .report_progress("a1", "1", ProgressStatus::Blocked, 10, None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(next_id(&retrying, "a2").await.as_deref(), Some("1"), "退回 TODO 后可被重新分配");
}

#[tokio::test]
async fn test_report_from_wrong_agent_is_not_assigned() {
    let (scheduler, _, _) = setup(vec![Task::new("1", "one")]).await;
    register(&scheduler, &["a1", "a2"]).await;
    next_id(&scheduler, "a1").await;
    let err = scheduler
        .report_progress("a2", "1", ProgressStatus::Completed, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Assignment(AssignmentError::NotAssigned { .. })
    ));
    assert_eq!(scheduler.task("1").await.unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_report_unknown_task() {
    let (scheduler, _, _) = setup(vec![]).await;
    let err = scheduler
        .report_progress("a1", "nope", ProgressStatus::Completed, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Assignment(AssignmentError::TaskNotFound(_))
    ));
}

// ── 租约 ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expired_lease_is_reclaimed() {
    let (scheduler, clock, _) = setup(vec![Task::new("1", "one")]).await;
    register(&scheduler, &["a1", "a2"]).await;
    let assignment = scheduler.request_next_task("a1").await.unwrap();
    let lease = assignment.task().unwrap().lease_expires_at;
    assert_eq!(lease, START + 1800);

    assert_eq!(scheduler.reclaim_expired_leases(lease).await.unwrap(), 0, "租约到期时刻尚未过期");
    clock.set(lease + 1);
    assert_eq!(scheduler.reclaim_expired_leases(clock.now_secs()).await.unwrap(), 1);

    let task = scheduler.task("1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert!(task.assigned_to.is_none());

    let err = scheduler
        .report_progress("a1", "1", ProgressStatus::Completed, 100, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Assignment(AssignmentError::NotAssigned { .. })
    ));
    assert_eq!(next_id(&scheduler, "a2").await.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_progress_report_renews_lease() {
    let config = EngineConfig::default().with_lease_secs(100);
    let (scheduler, clock, _) = setup_with(vec![Task::new("1", "one")], config).await;
    register(&scheduler, &["a1"]).await;
    next_id(&scheduler, "a1").await;

    clock.advance(80);
    let task = scheduler
        .report_progress("a1", "1", ProgressStatus::InProgress, 50, Some("halfway"))
        .await
        .unwrap();
    assert_eq!(task.lease_expires_at, Some(START + 180));
    assert_eq!(task.progress, 50);

    clock.advance(50);
    assert_eq!(scheduler.reclaim_expired_leases(clock.now_secs()).await.unwrap(), 0);
}

// ── 僵局 ──────────────────────────────────────────────────────────────────────

fn stuck_plan() -> Vec<Task> {
    vec![
        Task::new("D", "Design").with_status(TaskStatus::Blocked),
        Task::new("A", "Impl A").with_dependencies(["D"]),
        Task::new("B", "Impl B").with_dependencies(["D"]),
    ]
}

#[tokio::test]
async fn test_repeated_failed_requests_raise_gridlock() {
    let (scheduler, clock, _) = setup(stuck_plan()).await;
    register(&scheduler, &["a1", "a2"]).await;

    for agent in ["a1", "a2", "a1"] {
        clock.advance(10);
        let r = scheduler.request_next_task(agent).await.unwrap();
        assert_eq!(reason(&r), Some(NoneAvailableReason::AllBlocked));
    }

    let status = scheduler.get_gridlock_status().await;
    assert!(status.is_gridlock);
    assert_eq!(status.severity, GridlockSeverity::Critical);
    assert_eq!(status.metrics.blocked_tasks, 2);
    assert_eq!(status.last_alert_at, Some(START + 30));
    let diagnosis = status.diagnosis.unwrap();
    assert_eq!(diagnosis.root_blockers[0].dependency_id, "D");
    assert_eq!(diagnosis.root_blockers[0].status, "BLOCKED");

    scheduler.reset_gridlock_cooldown().await;
    assert!(scheduler.get_gridlock_status().await.last_alert_at.is_none());
}

#[tokio::test]
async fn test_eligible_task_suppresses_gridlock() {
    let mut tasks = stuck_plan();
    tasks.push(Task::new("C", "Docs"));
    let (scheduler, _, _) = setup(tasks).await;
    register(&scheduler, &["a1", "a2", "a3", "a4"]).await;

    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("C"));
    for agent in ["a2", "a3", "a4"] {
        scheduler.request_next_task(agent).await.unwrap();
    }
    let status = scheduler.get_gridlock_status().await;
    assert!(status.is_gridlock, "C 进行中、其余 TODO 全部被卡住");

    scheduler.reset_task("C").await.unwrap();
    let status = scheduler.get_gridlock_status().await;
    assert!(!status.is_gridlock, "存在可分配的 TODO 任务时不判定僵局");
    assert_eq!(status.severity, GridlockSeverity::None);
}

// ── 运维操作与持久化 ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reset_task() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "stuck").with_status(TaskStatus::Blocked),
        Task::new("2", "done").with_status(TaskStatus::Done),
    ])
    .await;
    let task = scheduler.reset_task("1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo);

    let err = scheduler.reset_task("2").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Assignment(AssignmentError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_add_task_and_reload() {
    let (scheduler, clock, store) = setup(vec![Task::new("1", "one")]).await;
    register(&scheduler, &["a1"]).await;

    scheduler.add_task(Task::new("2", "urgent").with_priority(10)).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("2"));
    assert_eq!(scheduler.task("2").await.unwrap().created_at, clock.now_secs());

    store.replace_tasks(vec![Task::new("9", "fresh")]);
    assert_eq!(scheduler.reload().await.unwrap(), 1);
    assert!(scheduler.task("1").await.is_none());
    assert!(scheduler.summary().await.contains("0/1"));
}

#[tokio::test]
async fn test_every_mutation_is_persisted() {
    let (scheduler, clock, store) = setup(vec![Task::new("1", "one"), Task::new("2", "two")]).await;
    register(&scheduler, &["a1", "a2"]).await;
    next_id(&scheduler, "a1").await;
    next_id(&scheduler, "a2").await;
    complete(&scheduler, "a1", "1").await;
    clock.advance(10_000);
    scheduler.reclaim_expired_leases(clock.now_secs()).await.unwrap();

    assert_eq!(store.save_count(), 4);
    let statuses: Vec<(String, TaskStatus)> =
        store.saves().into_iter().map(|t| (t.id, t.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("1".to_string(), TaskStatus::InProgress),
            ("2".to_string(), TaskStatus::InProgress),
            ("1".to_string(), TaskStatus::Done),
            ("2".to_string(), TaskStatus::Todo),
        ]
    );
}

#[tokio::test]
async fn test_replacing_held_task_keeps_assignment() {
    let (scheduler, _, _) = setup(vec![Task::new("1", "one")]).await;
    register(&scheduler, &["a1", "a2"]).await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("1"));
    let lease = scheduler.task("1").await.unwrap().lease_expires_at;

    scheduler
        .add_task(Task::new("1", "one (edited)").with_description("clarified scope"))
        .await;

    let task = scheduler.task("1").await.unwrap();
    assert_eq!(task.name, "one (edited)");
    assert_eq!(task.description, "clarified scope");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_to.as_deref(), Some("a1"), "替换定义不能改变任务持有者");
    assert_eq!(task.lease_expires_at, lease);

    let r = scheduler.request_next_task("a2").await.unwrap();
    assert_eq!(reason(&r), Some(NoneAvailableReason::AllAssigned));
    complete(&scheduler, "a1", "1").await;
}

#[tokio::test]
async fn test_replacing_task_updates_dependencies() {
    let (scheduler, _, _) = setup(vec![Task::new("1", "one"), Task::new("2", "two")]).await;
    register(&scheduler, &["a1"]).await;

    scheduler
        .add_task(Task::new("1", "one").with_dependencies(["2"]))
        .await;
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_loaded_in_progress_without_lease_gets_one() {
    let mut orphan = Task::new("1", "half done").with_status(TaskStatus::InProgress);
    orphan.assigned_to = Some("crashed-agent".to_string());
    let (scheduler, clock, _) = setup(vec![orphan]).await;
    register(&scheduler, &["a1"]).await;

    let task = scheduler.task("1").await.unwrap();
    assert_eq!(task.lease_expires_at, Some(START + 1800), "缺失的租约从加载时刻起补发");

    clock.set(START + 1801);
    assert_eq!(scheduler.reclaim_expired_leases(clock.now_secs()).await.unwrap(), 1);
    assert_eq!(next_id(&scheduler, "a1").await.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_loaded_stale_assignments_are_cleared() {
    let mut stale_todo = Task::new("1", "todo with owner");
    stale_todo.assigned_to = Some("ghost".to_string());
    stale_todo.lease_expires_at = Some(START + 10);
    let unowned = Task::new("2", "in progress without owner").with_status(TaskStatus::InProgress);
    let (scheduler, _, store) = setup(vec![Task::new("0", "placeholder")]).await;
    register(&scheduler, &["a1", "a2"]).await;

    store.replace_tasks(vec![stale_todo, unowned]);
    assert_eq!(scheduler.reload().await.unwrap(), 2);

    let task = scheduler.task("2").await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo, "没有持有者的进行中任务退回 TODO");

    let mut got = HashSet::new();
    got.extend(next_id(&scheduler, "a1").await);
    got.extend(next_id(&scheduler, "a2").await);
    assert_eq!(got, HashSet::from(["1".to_string(), "2".to_string()]));
}

#[tokio::test]
async fn test_save_failure_keeps_in_memory_state() {
    let clock = Arc::new(ManualClock::new(START));
    let store = Arc::new(
        RecordingTaskStore::with_tasks(vec![Task::new("1", "one")]).with_save_failure("disk full"),
    );
    let scheduler = AssignmentScheduler::new(&EngineConfig::default(), store.clone(), clock)
        .await
        .unwrap();
    scheduler.register_agent("a1").await;

    assert!(scheduler.request_next_task("a1").await.unwrap().task().is_some());
    assert_eq!(store.save_count(), 0);
    assert_eq!(scheduler.task("1").await.unwrap().status, TaskStatus::InProgress);
}

#[tokio::test]
async fn test_task_graph_snapshot() {
    let (scheduler, _, _) = setup(vec![
        Task::new("1", "one"),
        Task::new("2", "two").with_dependencies(["1"]),
    ])
    .await;
    let graph = scheduler.get_task_graph().await;
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.execution_order, Some(vec!["1".to_string(), "2".to_string()]));
}

#[test]
fn test_progress_status_parsing() {
    assert_eq!("done".parse::<ProgressStatus>(), Ok(ProgressStatus::Completed));
    assert_eq!("in_progress".parse::<ProgressStatus>(), Ok(ProgressStatus::InProgress));
    assert_eq!("FAILED".parse::<ProgressStatus>(), Ok(ProgressStatus::Failed));
    assert!("maybe".parse::<ProgressStatus>().is_err());
}
