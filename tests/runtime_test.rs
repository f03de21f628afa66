//! Integration tests for the agent polling loop
//!
//! Handlers here are small recorders standing in for real agent logic.

mod common;

use agent_substrate::runtime::{
    AgentContext, AgentRuntime, CycleError, HandlerError, HandlerResult, HandlerTable,
    MessageHandler, PeriodicAction, RuntimeState, TaskHandler,
};
use agent_substrate::{
    AgentIdentity, AgentStatus, Mailbox, Message, Registry, RuntimeConfig, Store, SubstrateError,
    Task, TaskQueue, TaskStatus,
};
use async_trait::async_trait;
use common::{insert_raw_message, insert_raw_task, temp_store, wait_for};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const AGENT: &str = "reporting_agent_1";

#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, entry: String) {
        self.seen.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(&self, _ctx: &AgentContext, task: &Task) -> HandlerResult<Value> {
        self.push(task.task_id.clone());
        Ok(json!({"ok": true}))
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, _ctx: &AgentContext, message: &Message) -> HandlerResult<()> {
        self.push(message.message_type.clone());
        Ok(())
    }
}

#[async_trait]
impl PeriodicAction for Recorder {
    async fn run(&self, _ctx: &AgentContext) -> HandlerResult<()> {
        self.push("periodic".to_string());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl TaskHandler for Failing {
    async fn handle(&self, _ctx: &AgentContext, _task: &Task) -> HandlerResult<Value> {
        Err(HandlerError::Failed("report storage unavailable".to_string()))
    }
}

#[async_trait]
impl MessageHandler for Failing {
    async fn handle(&self, _ctx: &AgentContext, _message: &Message) -> HandlerResult<()> {
        Err(HandlerError::Failed("cannot handle".to_string()))
    }
}

/// Hands every task it gets on to the alert agent
struct Forwarder;

#[async_trait]
impl TaskHandler for Forwarder {
    async fn handle(&self, ctx: &AgentContext, task: &Task) -> HandlerResult<Value> {
        let id = ctx
            .send("alert_agent_1", "anomalies_detected", &task.payload)
            .await?;
        let follow_up = ctx
            .create_task("alert_agent_1", &json!({"type": "notify"}), 7)
            .await?;
        Ok(json!({"message_id": id, "follow_up": follow_up}))
    }
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig::new(Duration::from_millis(20), Duration::from_millis(20))
}

fn runtime(store: &Store, handlers: HandlerTable, config: RuntimeConfig) -> AgentRuntime {
    AgentRuntime::new(
        store,
        AgentIdentity::new("reporting", Some(AGENT.to_string())),
        handlers,
        config,
    )
}

#[tokio::test]
async fn test_start_registers_and_activates() {
    let (store, _dir) = temp_store().await;
    let mut agent = runtime(&store, HandlerTable::new(), fast_config());
    assert_eq!(agent.state(), RuntimeState::Starting);

    agent.start().await.unwrap();

    assert_eq!(agent.state(), RuntimeState::Active);
    let record = Registry::new(&store).get(AGENT).await.unwrap().unwrap();
    assert_eq!(record.status, AgentStatus::Active);
    assert_eq!(record.agent_type, "reporting");
}

#[tokio::test]
async fn test_cycle_runs_tasks_in_priority_order() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_task("generate_report", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    let low = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();
    let high = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 8)
        .await
        .unwrap();

    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.tasks_completed, 2);
    assert!(!report.periodic_ran);
    assert_eq!(recorder.entries(), vec![high.clone(), low.clone()]);

    for id in [&high, &low] {
        let task = tasks.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"ok": true})));
    }
    assert!(tasks.fetch_pending(AGENT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_handler_fails_task_and_stops_cycle() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let mut agent = runtime(
        &store,
        HandlerTable::new()
            .on_task("broken", Failing)
            .on_task("generate_report", Recorder::default()),
        fast_config(),
    );
    agent.start().await.unwrap();

    let broken = tasks.create(AGENT, &json!({"type": "broken"}), 9).await.unwrap();
    let later = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 1)
        .await
        .unwrap();

    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(&err, CycleError::Task { task_id, .. } if *task_id == broken));

    let failed = tasks.get(&broken).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let result = failed.result.unwrap();
    assert_eq!(result["kind"], "failed");
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("report storage unavailable"));

    // Left for the next cycle
    let pending = tasks.fetch_pending(AGENT).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_id, later);
}

#[tokio::test]
async fn test_unknown_and_untyped_tasks_fail() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let mut agent = runtime(&store, HandlerTable::new(), fast_config());
    agent.start().await.unwrap();

    let unknown = tasks
        .create(AGENT, &json!({"type": "collect_sales_data"}), 5)
        .await
        .unwrap();
    assert!(agent.run_cycle().await.is_err());
    let task = tasks.get(&unknown).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.unwrap()["kind"], "unknown_task_type");

    let untyped = tasks.create(AGENT, &json!({"date": "2025-04-01"}), 5).await.unwrap();
    assert!(agent.run_cycle().await.is_err());
    let task = tasks.get(&untyped).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.unwrap()["kind"], "malformed_payload");
}

#[tokio::test]
async fn test_messages_dispatched_by_type() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new()
            .on_message("report_request", recorder.clone())
            .on_message("data_collected", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    mailbox.send("a", AGENT, "data_collected", &json!({})).await.unwrap();
    mailbox.send("a", AGENT, "mystery", &json!({})).await.unwrap();
    mailbox.send("a", AGENT, "report_request", &json!({})).await.unwrap();

    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.messages_received, 3);
    assert_eq!(report.messages_handled, 2);
    assert_eq!(report.messages_skipped, 1);
    assert_eq!(recorder.entries(), vec!["data_collected", "report_request"]);
    assert_eq!(mailbox.unread_count(AGENT).await.unwrap(), 0);
}

#[tokio::test]
async fn test_message_failure_still_consumes_batch_and_skips_tasks() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let tasks = TaskQueue::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new()
            .on_message("bad", Failing)
            .on_message("good", recorder.clone())
            .on_task("generate_report", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    let bad = mailbox.send("a", AGENT, "bad", &json!({})).await.unwrap();
    mailbox.send("a", AGENT, "good", &json!({})).await.unwrap();
    tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();

    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Message { message_id, .. } if message_id == bad));
    assert_eq!(recorder.entries(), vec!["good"]);
    assert_eq!(mailbox.unread_count(AGENT).await.unwrap(), 0);
    assert_eq!(tasks.fetch_pending(AGENT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_configuration_message_changes_poll_interval() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let mut agent = runtime(&store, HandlerTable::new(), fast_config());
    agent.start().await.unwrap();

    mailbox
        .send("operator", AGENT, "configuration", &json!({"poll_interval_secs": 300}))
        .await
        .unwrap();
    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.messages_handled, 1);
    assert_eq!(agent.poll_interval(), Duration::from_secs(300));

    mailbox
        .send("operator", AGENT, "configuration", &json!({"poll_interval_secs": "often"}))
        .await
        .unwrap();
    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Message {
            source: HandlerError::MalformedPayload(_),
            ..
        }
    ));
    assert_eq!(agent.poll_interval(), Duration::from_secs(300));
}

#[tokio::test]
async fn test_configuration_message_reaches_registered_handler() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_message("configuration", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    mailbox
        .send("operator", AGENT, "configuration", &json!({"alert_channels": ["system"]}))
        .await
        .unwrap();
    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.messages_handled, 1);
    assert_eq!(recorder.entries(), vec!["configuration"]);
    assert_eq!(agent.poll_interval(), Duration::from_millis(20));
}

#[tokio::test]
async fn test_configuration_handler_runs_when_poll_interval_is_rejected() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_message("configuration", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    mailbox
        .send(
            "operator",
            AGENT,
            "configuration",
            &json!({"poll_interval_secs": 0, "alert_channels": ["email"]}),
        )
        .await
        .unwrap();
    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Message {
            source: HandlerError::MalformedPayload(_),
            ..
        }
    ));
    assert_eq!(recorder.entries(), vec!["configuration"]);
    assert_eq!(agent.poll_interval(), Duration::from_millis(20));
}

#[tokio::test]
async fn test_non_json_message_fails_alone() {
    let (store, _dir) = temp_store().await;
    let mailbox = Mailbox::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_message("report_request", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    let bad = insert_raw_message(&store, AGENT, "report_request", "<xml/>", 0).await;
    mailbox.send("a", AGENT, "report_request", &json!({})).await.unwrap();

    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Message {
            message_id,
            source: HandlerError::MalformedPayload(_),
            ..
        } if message_id == bad
    ));
    assert_eq!(recorder.entries(), vec!["report_request"]);
    assert_eq!(mailbox.unread_count(AGENT).await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_json_task_is_failed_and_queue_keeps_moving() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_task("generate_report", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    insert_raw_task(&store, "task_garbled", AGENT, "{\"type\": ", 9).await;
    let good = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();

    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(&err, CycleError::Task { task_id, .. } if task_id == "task_garbled"));

    let garbled = tasks.get("task_garbled").await.unwrap().unwrap();
    assert_eq!(garbled.status, TaskStatus::Failed);
    assert_eq!(garbled.result.unwrap()["kind"], "malformed_payload");

    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.tasks_completed, 1);
    assert_eq!(recorder.entries(), vec![good.clone()]);
    assert_eq!(
        tasks.get(&good).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_unrecordable_task_failure_surfaces_store_error() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);

    /// Finishes its own task, then reports failure
    struct CompletesThenFails;

    #[async_trait]
    impl TaskHandler for CompletesThenFails {
        async fn handle(&self, ctx: &AgentContext, task: &Task) -> HandlerResult<Value> {
            ctx.tasks()
                .update_status(&task.task_id, TaskStatus::Completed, Some(&json!({"early": true})))
                .await?;
            Err(HandlerError::Failed("late failure".to_string()))
        }
    }

    let mut agent = runtime(
        &store,
        HandlerTable::new().on_task("racy", CompletesThenFails),
        fast_config(),
    );
    agent.start().await.unwrap();

    let t = tasks.create(AGENT, &json!({"type": "racy"}), 5).await.unwrap();
    let err = agent.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Substrate(SubstrateError::InvalidTransition {
            from: TaskStatus::Completed,
            to: TaskStatus::Failed,
            ..
        })
    ));

    let task = tasks.get(&t).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!({"early": true})));
}

#[tokio::test]
async fn test_periodic_action_only_when_idle() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let recorder = Recorder::default();
    let mut agent = runtime(
        &store,
        HandlerTable::new()
            .on_task("generate_report", Recorder::default())
            .periodic(recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();
    let busy = agent.run_cycle().await.unwrap();
    assert!(!busy.periodic_ran);
    assert!(recorder.entries().is_empty());

    let idle = agent.run_cycle().await.unwrap();
    assert!(idle.periodic_ran);
    assert_eq!(recorder.entries(), vec!["periodic"]);
}

#[tokio::test]
async fn test_handlers_can_hand_off_work() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let mailbox = Mailbox::new(&store);
    let mut agent = runtime(
        &store,
        HandlerTable::new().on_task("forward", Forwarder),
        fast_config(),
    );
    agent.start().await.unwrap();

    let t = tasks
        .create(AGENT, &json!({"type": "forward", "source": "web"}), 5)
        .await
        .unwrap();
    agent.run_cycle().await.unwrap();

    let inbox = mailbox.receive("alert_agent_1", true).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender_id, AGENT);
    assert_eq!(inbox[0].payload["source"], "web");

    let follow_ups = tasks.fetch_pending("alert_agent_1").await.unwrap();
    assert_eq!(follow_ups.len(), 1);
    assert_eq!(follow_ups[0].priority, 7);

    let result = tasks.get(&t).await.unwrap().unwrap().result.unwrap();
    assert_eq!(result["follow_up"], follow_ups[0].task_id.as_str());
}

#[tokio::test]
async fn test_task_claimed_elsewhere_is_skipped() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let recorder = Recorder::default();

    /// Claims the other pending task before the runtime reaches it
    struct Claimer(TaskQueue);

    #[async_trait]
    impl TaskHandler for Claimer {
        async fn handle(&self, ctx: &AgentContext, task: &Task) -> HandlerResult<Value> {
            for other in ctx.tasks().fetch_pending(ctx.agent_id()).await? {
                if other.task_id != task.task_id {
                    self.0
                        .update_status(&other.task_id, TaskStatus::InProgress, None)
                        .await?;
                }
            }
            Ok(Value::Null)
        }
    }

    let mut agent = runtime(
        &store,
        HandlerTable::new()
            .on_task("claim", Claimer(tasks.clone()))
            .on_task("generate_report", recorder.clone()),
        fast_config(),
    );
    agent.start().await.unwrap();

    tasks.create(AGENT, &json!({"type": "claim"}), 9).await.unwrap();
    tasks
        .create(AGENT, &json!({"type": "generate_report"}), 1)
        .await
        .unwrap();

    let report = agent.run_cycle().await.unwrap();
    assert_eq!(report.tasks_completed, 1);
    assert_eq!(report.tasks_skipped, 1);
    assert!(recorder.entries().is_empty());
}

#[tokio::test]
async fn test_run_loop_processes_work_and_stops_on_cancel() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let registry = Registry::new(&store);
    let agent = runtime(
        &store,
        HandlerTable::new().on_task("generate_report", Recorder::default()),
        fast_config(),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    let t = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();
    wait_for(Duration::from_secs(5), || {
        let tasks = tasks.clone();
        let t = t.clone();
        async move {
            matches!(
                tasks.get(&t).await,
                Ok(Some(task)) if task.status == TaskStatus::Completed
            )
        }
    })
    .await;
    assert_eq!(
        registry.get(AGENT).await.unwrap().unwrap().status,
        AgentStatus::Active
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runtime stops after cancel")
        .unwrap();
    assert_eq!(
        registry.get(AGENT).await.unwrap().unwrap().status,
        AgentStatus::Inactive
    );
}

#[tokio::test]
async fn test_run_loop_reports_error_then_recovers() {
    let (store, _dir) = temp_store().await;
    let tasks = TaskQueue::new(&store);
    let registry = Registry::new(&store);
    let agent = runtime(
        &store,
        HandlerTable::new()
            .on_task("broken", Failing)
            .on_task("generate_report", Recorder::default()),
        RuntimeConfig::new(Duration::from_millis(20), Duration::from_millis(300)),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.run(cancel.clone()));

    // Publishes error status while backing off
    let broken = tasks.create(AGENT, &json!({"type": "broken"}), 5).await.unwrap();
    wait_for(Duration::from_secs(5), || {
        let registry = registry.clone();
        async move {
            matches!(
                registry.get(AGENT).await,
                Ok(Some(record)) if record.status == AgentStatus::Error
            )
        }
    })
    .await;
    assert_eq!(
        tasks.get(&broken).await.unwrap().unwrap().status,
        TaskStatus::Failed
    );

    // Back to active after the backoff, and still doing work
    let good = tasks
        .create(AGENT, &json!({"type": "generate_report"}), 5)
        .await
        .unwrap();
    wait_for(Duration::from_secs(5), || {
        let tasks = tasks.clone();
        let good = good.clone();
        async move {
            matches!(
                tasks.get(&good).await,
                Ok(Some(task)) if task.status == TaskStatus::Completed
            )
        }
    })
    .await;
    assert_eq!(
        registry.get(AGENT).await.unwrap().unwrap().status,
        AgentStatus::Active
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runtime stops after cancel")
        .unwrap();
}
