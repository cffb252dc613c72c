use async_trait::async_trait;
use mozi_cron::{
    AgentExecutor, AgentTurnRequest, AgentTurnResponse, CreateJob, Executor, FakeClock,
    FileJobStore, JobStore, Payload, RunStatus, Schedule, SchedulerConfig, SchedulerService,
};
use mozi_delivery::{Channel, ChannelRegistry, DeliveryResult, DeliveryService, OutboundPayload};
use std::sync::{Arc, Mutex};

struct StubChannel {
    id: String,
    calls: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Channel for StubChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_message(&self, chat_id: &str, payload: &OutboundPayload) -> DeliveryResult {
        self.calls
            .lock()
            .unwrap()
            .push((chat_id.to_string(), payload.text.clone()));
        DeliveryResult::ok(&self.id, Some("m-42".to_string()))
    }
}

struct StubAgent {
    success: bool,
    output: String,
    error: Option<String>,
}

#[async_trait]
impl AgentExecutor for StubAgent {
    async fn execute(&self, _request: AgentTurnRequest) -> anyhow::Result<AgentTurnResponse> {
        Ok(AgentTurnResponse {
            success: self.success,
            output: self.output.clone(),
            error: self.error.clone(),
        })
    }
}

fn build_service(
    clock: Arc<FakeClock>,
    store_dir: &std::path::Path,
    agent: Option<Arc<dyn AgentExecutor>>,
    channel: Option<Arc<StubChannel>>,
) -> Arc<SchedulerService> {
    let mut registry = ChannelRegistry::new();
    if let Some(channel) = channel {
        registry.register(channel);
    }
    let delivery = Arc::new(DeliveryService::new(Arc::new(registry)));
    let executor = Arc::new(Executor::new(agent, delivery));
    let store = Arc::new(FileJobStore::new(store_dir.join("jobs.json")));
    Arc::new(SchedulerService::new(
        store,
        clock,
        executor,
        None,
        SchedulerConfig {
            tick_interval_ms: 1_000,
            shutdown_grace_ms: 1_000,
        },
    ))
}

#[tokio::test]
async fn scenario_s1_every_60s_system_event() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new(1_000_000);
    let service = build_service(clock.clone(), dir.path(), None, None);
    service.start().await.unwrap();

    let job = service
        .add(CreateJob {
            name: "J1".to_string(),
            enabled: None,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload: Payload::SystemEvent {
                message: "hello".to_string(),
            },
        })
        .await
        .unwrap();
    assert_eq!(job.state.next_run_at_ms, Some(1_060_000));

    clock.set(1_060_000);
    service.tick().await;

    let updated = service.get(&job.id).await.unwrap();
    assert_eq!(updated.state.run_count, 1);
    assert_eq!(updated.state.last_status, Some(RunStatus::Ok));
    assert_eq!(updated.state.next_run_at_ms, Some(1_120_000));

    service.stop().await;
}

#[tokio::test]
async fn scenario_s2_cron_with_timezone() {
    let dir = tempfile::tempdir().unwrap();
    use chrono::{TimeZone, Utc};
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
    let clock = FakeClock::new(start);
    let service = build_service(clock, dir.path(), None, None);
    service.start().await.unwrap();

    let job = service
        .add(CreateJob {
            name: "morning".to_string(),
            enabled: None,
            schedule: Schedule::Cron {
                expr: "0 9 * * *".to_string(),
                tz: Some("Asia/Shanghai".to_string()),
            },
            payload: Payload::AgentTurn {
                message: "report".to_string(),
                model: None,
                timeout_seconds: None,
                deliver: Some(true),
                channel: Some("dingtalk".to_string()),
                to: Some("u1".to_string()),
            },
        })
        .await
        .unwrap();

    let expected = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap().timestamp_millis();
    assert_eq!(job.state.next_run_at_ms, Some(expected));

    service.stop().await;
}

#[tokio::test]
async fn scenario_s3_agent_turn_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new(0);
    let channel = Arc::new(StubChannel {
        id: "dingtalk".to_string(),
        calls: Mutex::new(Vec::new()),
    });
    let agent: Arc<dyn AgentExecutor> = Arc::new(StubAgent {
        success: true,
        output: "The weather is sunny today!".to_string(),
        error: None,
    });
    let service = build_service(clock, dir.path(), Some(agent), Some(channel.clone()));
    service.start().await.unwrap();

    let job = service
        .add(CreateJob {
            name: "weather".to_string(),
            enabled: None,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload: Payload::AgentTurn {
                message: "weather?".to_string(),
                model: None,
                timeout_seconds: None,
                deliver: Some(true),
                channel: Some("dingtalk".to_string()),
                to: Some("u1".to_string()),
            },
        })
        .await
        .unwrap();

    let result = service.run(&job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Ok);
    assert_eq!(result.output_text.as_deref(), Some("The weather is sunny today!"));

    let calls = channel.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], ("u1".to_string(), "The weather is sunny today!".to_string()));

    service.stop().await;
}

#[tokio::test]
async fn scenario_s4_agent_failure_suppresses_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new(0);
    let channel = Arc::new(StubChannel {
        id: "dingtalk".to_string(),
        calls: Mutex::new(Vec::new()),
    });
    let agent: Arc<dyn AgentExecutor> = Arc::new(StubAgent {
        success: false,
        output: String::new(),
        error: Some("Model unavailable".to_string()),
    });
    let service = build_service(clock, dir.path(), Some(agent), Some(channel.clone()));
    service.start().await.unwrap();

    let job = service
        .add(CreateJob {
            name: "weather".to_string(),
            enabled: None,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload: Payload::AgentTurn {
                message: "weather?".to_string(),
                model: None,
                timeout_seconds: None,
                deliver: Some(true),
                channel: Some("dingtalk".to_string()),
                to: Some("u1".to_string()),
            },
        })
        .await
        .unwrap();

    let result = service.run(&job.id).await.unwrap();
    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.error.as_deref(), Some("Model unavailable"));
    assert!(channel.calls.lock().unwrap().is_empty());

    service.stop().await;
}

/// Property 5 (spec §8): at every instant, at most one executor invocation
/// per job is in flight, even if two ticks overlap because the first
/// execution hasn't finished yet.
#[tokio::test]
async fn single_flight_rejects_overlapping_tick_for_same_job() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowAgent {
        concurrent: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentExecutor for SlowAgent {
        async fn execute(&self, _request: AgentTurnRequest) -> anyhow::Result<AgentTurnResponse> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(AgentTurnResponse {
                success: true,
                output: "done".to_string(),
                error: None,
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new(1_000_000);
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let agent: Arc<dyn AgentExecutor> = Arc::new(SlowAgent {
        concurrent: concurrent.clone(),
        max_concurrent: max_concurrent.clone(),
        calls: calls.clone(),
    });
    let service = build_service(clock.clone(), dir.path(), Some(agent), None);
    service.start().await.unwrap();

    let job = service
        .add(CreateJob {
            name: "slow".to_string(),
            enabled: None,
            schedule: Schedule::Every { every_ms: 60_000 },
            payload: Payload::AgentTurn {
                message: "hi".to_string(),
                model: None,
                timeout_seconds: None,
                deliver: Some(false),
                channel: None,
                to: None,
            },
        })
        .await
        .unwrap();

    clock.set(job.state.next_run_at_ms.unwrap());

    // Two ticks in flight at once: the second must observe the lease held
    // by the first and skip the job rather than starting a second execution.
    let service_a = service.clone();
    let service_b = service.clone();
    tokio::join!(
        async move { service_a.tick().await },
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            service_b.tick().await
        }
    );

    assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    service.stop().await;
}

#[tokio::test]
async fn scenario_s6_crash_recovery_forward_progress() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileJobStore::new(dir.path().join("jobs.json"));

    let t = 1_000_000i64;
    let job = mozi_cron::Job {
        id: "j1".to_string(),
        name: "periodic".to_string(),
        enabled: true,
        schedule: Schedule::Every { every_ms: 60_000 },
        payload: Payload::SystemEvent {
            message: "tick".to_string(),
        },
        created_at_ms: t - 300_000,
        updated_at_ms: t - 300_000,
        state: mozi_cron::JobState {
            last_run_at_ms: Some(t - 200_000),
            next_run_at_ms: Some(t - 140_000),
            run_count: 3,
            last_error: None,
            last_status: Some(RunStatus::Ok),
        },
    };
    store.save(&[job]).await.unwrap();

    let clock = FakeClock::new(t);
    let service = build_service(clock, dir.path(), None, None);
    service.start().await.unwrap();

    let recovered = service.get("j1").await.unwrap();
    let next = recovered.state.next_run_at_ms.unwrap();
    assert!(next > t && next <= t + 60_000);

    service.stop().await;
}
