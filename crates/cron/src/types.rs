use serde::{Deserialize, Serialize};

/// Tagged union over the three schedule kinds (spec §3). Closed set — new
/// variants are an additive change to both this enum and the calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    At {
        #[serde(rename = "atMs")]
        at_ms: i64,
    },
    Every {
        #[serde(rename = "everyMs")]
        every_ms: i64,
    },
    Cron {
        expr: String,
        #[serde(default)]
        tz: Option<String>,
    },
}

/// Tagged union over the two payload kinds (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    SystemEvent {
        message: String,
    },
    AgentTurn {
        message: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        #[serde(rename = "timeoutSeconds")]
        timeout_seconds: Option<u32>,
        #[serde(default)]
        deliver: Option<bool>,
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default, rename = "lastRunAtMs")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, rename = "nextRunAtMs")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, rename = "runCount")]
    pub run_count: u64,
    #[serde(default, rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(default, rename = "lastStatus")]
    pub last_status: Option<RunStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: Payload,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: i64,
    #[serde(rename = "updatedAtMs")]
    pub updated_at_ms: i64,
    #[serde(default)]
    pub state: JobState,
}

/// Versioned JSON document persisted at the configured store path (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub version: u32,
    pub jobs: Vec<Job>,
}

impl StoreFile {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { version: 1, jobs }
    }
}

/// Request shape for `SchedulerService::add`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    pub schedule: Schedule,
    pub payload: Payload,
}

/// Partial update accepted by `SchedulerService::update`. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub summary: Option<String>,
    pub output_text: Option<String>,
    pub error: Option<String>,
}

/// Events emitted by the scheduler's best-effort sink (spec §4.G, §6).
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    JobAdded(Job),
    JobUpdated(Job),
    JobRemoved(Job),
    JobRan(Job, ExecutionResult),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_round_trips_through_json() {
        let s = Schedule::Cron {
            expr: "0 9 * * *".to_string(),
            tz: Some("Asia/Shanghai".to_string()),
        };
        let json = serde_json::to_string(&s).unwrap();
        let back: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn job_json_shape_matches_spec_example() {
        let json = r#"{
            "id":"j1","name":"morning report","enabled":true,
            "schedule":{"kind":"cron","expr":"0 9 * * *","tz":"Asia/Shanghai"},
            "payload":{"kind":"agentTurn","message":"hi","deliver":true,
                       "channel":"dingtalk","to":"u123","model":"m",
                       "timeoutSeconds":120},
            "createdAtMs":1,"updatedAtMs":1,
            "state":{"lastRunAtMs":2,"nextRunAtMs":3,"runCount":3,"lastStatus":"ok"}
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.state.run_count, 3);
        match job.payload {
            Payload::AgentTurn { deliver, channel, to, .. } => {
                assert_eq!(deliver, Some(true));
                assert_eq!(channel.as_deref(), Some("dingtalk"));
                assert_eq!(to.as_deref(), Some("u123"));
            }
            _ => panic!("expected agentTurn"),
        }
    }
}
