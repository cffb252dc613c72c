use crate::{Tool, ToolError};
use async_trait::async_trait;
use mozi_core::channel::is_native_channel_supported;
use mozi_cron::{Clock, CreateJob, Job, JobPatch, Payload, RunStatus, Schedule, SchedulerService, SystemClock};
use serde_json::{json, Value};
use std::sync::Arc;

fn error_envelope(message: &str) -> String {
    json!({
        "isError": true,
        "content": [{ "type": "text", "text": format!("错误: {message}") }]
    })
    .to_string()
}

fn every_ms_from_unit(unit: &str, value: i64) -> Result<i64, String> {
    let factor = match unit {
        "seconds" => 1_000,
        "minutes" => 60_000,
        "hours" => 3_600_000,
        "days" => 86_400_000,
        other => return Err(format!("unsupported everyUnit: {other}")),
    };
    Ok(value * factor)
}

fn parse_schedule(args: &Value) -> Result<Schedule, String> {
    let schedule_type = args["scheduleType"]
        .as_str()
        .ok_or_else(|| "scheduleType is required".to_string())?;

    match schedule_type {
        "at" => {
            let at_ms = args["atMs"]
                .as_i64()
                .ok_or_else(|| "atMs is required for scheduleType='at'".to_string())?;
            if at_ms <= SystemClock.now_ms() {
                return Err("atMs must be in the future".to_string());
            }
            Ok(Schedule::At { at_ms })
        }
        "every" => {
            if let Some(every_ms) = args["everyMs"].as_i64() {
                if every_ms <= 0 {
                    return Err("everyMs must be positive".to_string());
                }
                return Ok(Schedule::Every { every_ms });
            }
            let unit = args["everyUnit"]
                .as_str()
                .ok_or_else(|| "everyUnit or everyMs is required for scheduleType='every'".to_string())?;
            let value = args["everyValue"]
                .as_i64()
                .ok_or_else(|| "everyValue is required alongside everyUnit".to_string())?;
            if value <= 0 {
                return Err("everyValue must be positive".to_string());
            }
            let every_ms = every_ms_from_unit(unit, value)?;
            Ok(Schedule::Every { every_ms })
        }
        "cron" => {
            let expr = args["expr"]
                .as_str()
                .ok_or_else(|| "expr is required for scheduleType='cron'".to_string())?
                .to_string();
            let tz = args["tz"].as_str().map(str::to_string);
            let schedule = Schedule::Cron { expr, tz };
            // Validate eagerly so malformed expressions fail at tool-call time.
            mozi_cron::next_run_at_ms(&schedule, None, 0)
                .map_err(|e| format!("invalid cron expression: {e}"))?;
            Ok(schedule)
        }
        other => Err(format!("unsupported scheduleType: {other}")),
    }
}

fn parse_payload(args: &Value) -> Result<Payload, String> {
    let payload_type = args["payloadType"].as_str().unwrap_or("agentTurn");

    match payload_type {
        "systemEvent" => {
            let message = args["message"]
                .as_str()
                .ok_or_else(|| "message is required".to_string())?
                .to_string();
            Ok(Payload::SystemEvent { message })
        }
        "agentTurn" => {
            let message = args["message"]
                .as_str()
                .ok_or_else(|| "message is required".to_string())?
                .to_string();
            let model = args["model"].as_str().map(str::to_string);
            let deliver = args["deliver"].as_bool();
            let channel = args["channel"].as_str().map(str::to_string);
            let to = args["to"].as_str().map(str::to_string);
            let timeout_seconds = match args["timeoutSeconds"].as_u64() {
                Some(v) => {
                    if !(1..=600).contains(&v) {
                        return Err("timeoutSeconds must be in [1, 600]".to_string());
                    }
                    Some(v as u32)
                }
                None => None,
            };

            if deliver == Some(true) {
                if channel.is_none() || to.is_none() {
                    return Err("deliver=true requires both channel and to".to_string());
                }
                let channel_id = channel.as_deref().unwrap();
                if channel_id != mozi_core::channel::CHANNEL_LAST
                    && !is_native_channel_supported(channel_id)
                {
                    return Err(format!("unknown channel: {channel_id}"));
                }
            }

            Ok(Payload::AgentTurn {
                message,
                model,
                timeout_seconds,
                deliver,
                channel,
                to,
            })
        }
        other => Err(format!("unsupported payloadType: {other}")),
    }
}

fn render_job(job: &Job) -> Value {
    json!({
        "id": job.id,
        "name": job.name,
        "enabled": job.enabled,
        "schedule": job.schedule,
        "payload": job.payload,
        "state": job.state,
    })
}

fn render_job_summary(job: &Job) -> String {
    let status = job
        .state
        .last_status
        .as_ref()
        .map(|s| format!("{s:?}"))
        .unwrap_or_else(|| "never run".to_string());
    format!(
        "[{}] {} (enabled={}, runCount={}, lastStatus={})",
        job.id, job.name, job.enabled, job.state.run_count, status
    )
}

pub struct CronListTool {
    service: Arc<SchedulerService>,
}

impl CronListTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CronListTool {
    fn name(&self) -> &str {
        "cron_list"
    }

    fn description(&self) -> &str {
        "List scheduled jobs, optionally including disabled ones."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "includeDisabled": { "type": "boolean", "description": "Include disabled jobs. Default: false." }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let include_disabled = args["includeDisabled"].as_bool().unwrap_or(false);
        let jobs = self.service.list(include_disabled).await;
        if jobs.is_empty() {
            return Ok("No scheduled jobs.".to_string());
        }
        let lines: Vec<String> = jobs.iter().map(render_job_summary).collect();
        Ok(lines.join("\n"))
    }
}

pub struct CronAddTool {
    service: Arc<SchedulerService>,
}

impl CronAddTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CronAddTool {
    fn name(&self) -> &str {
        "cron_add"
    }

    fn description(&self) -> &str {
        "Create a new scheduled job. scheduleType is one of 'at', 'every', 'cron'; \
         payloadType is 'systemEvent' or 'agentTurn' (default)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "enabled": { "type": "boolean" },
                "scheduleType": { "type": "string", "enum": ["at", "every", "cron"] },
                "atMs": { "type": "integer" },
                "everyMs": { "type": "integer" },
                "everyUnit": { "type": "string", "enum": ["seconds", "minutes", "hours", "days"] },
                "everyValue": { "type": "integer" },
                "expr": { "type": "string" },
                "tz": { "type": "string" },
                "payloadType": { "type": "string", "enum": ["systemEvent", "agentTurn"] },
                "message": { "type": "string" },
                "model": { "type": "string" },
                "timeoutSeconds": { "type": "integer" },
                "deliver": { "type": "boolean" },
                "channel": { "type": "string" },
                "to": { "type": "string" }
            },
            "required": ["name", "scheduleType", "message"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let name = match args["name"].as_str() {
            Some(n) => n.to_string(),
            None => return Ok(error_envelope("name is required")),
        };

        let schedule = match parse_schedule(&args) {
            Ok(s) => s,
            Err(e) => return Ok(error_envelope(&e)),
        };

        let payload = match parse_payload(&args) {
            Ok(p) => p,
            Err(e) => return Ok(error_envelope(&e)),
        };

        let enabled = args["enabled"].as_bool();

        let job = self
            .service
            .add(CreateJob {
                name,
                enabled,
                schedule,
                payload,
            })
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        Ok(format!(
            "Job created: {}",
            serde_json::to_string_pretty(&render_job(&job)).unwrap_or_default()
        ))
    }
}

pub struct CronRemoveTool {
    service: Arc<SchedulerService>,
}

impl CronRemoveTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CronRemoveTool {
    fn name(&self) -> &str {
        "cron_remove"
    }

    fn description(&self) -> &str {
        "Remove a scheduled job by id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "jobId": { "type": "string" } },
            "required": ["jobId"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let Some(job_id) = args["jobId"].as_str() else {
            return Ok(error_envelope("jobId is required"));
        };

        let removed = self
            .service
            .remove(job_id)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        if removed {
            Ok(format!("Job {job_id} removed"))
        } else {
            Ok(error_envelope(&format!("job not found: {job_id}")))
        }
    }
}

pub struct CronUpdateTool {
    service: Arc<SchedulerService>,
}

impl CronUpdateTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CronUpdateTool {
    fn name(&self) -> &str {
        "cron_update"
    }

    fn description(&self) -> &str {
        "Update a scheduled job's name, enabled flag, schedule, or payload. \
         Only supplied fields are changed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "jobId": { "type": "string" },
                "name": { "type": "string" },
                "enabled": { "type": "boolean" },
                "scheduleType": { "type": "string", "enum": ["at", "every", "cron"] },
                "atMs": { "type": "integer" },
                "everyMs": { "type": "integer" },
                "everyUnit": { "type": "string", "enum": ["seconds", "minutes", "hours", "days"] },
                "everyValue": { "type": "integer" },
                "expr": { "type": "string" },
                "tz": { "type": "string" },
                "payloadType": { "type": "string", "enum": ["systemEvent", "agentTurn"] },
                "message": { "type": "string" },
                "model": { "type": "string" },
                "timeoutSeconds": { "type": "integer" },
                "deliver": { "type": "boolean" },
                "channel": { "type": "string" },
                "to": { "type": "string" }
            },
            "required": ["jobId"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let Some(job_id) = args["jobId"].as_str() else {
            return Ok(error_envelope("jobId is required"));
        };

        let mut patch = JobPatch::default();
        if let Some(name) = args["name"].as_str() {
            patch.name = Some(name.to_string());
        }
        if let Some(enabled) = args["enabled"].as_bool() {
            patch.enabled = Some(enabled);
        }
        if !args["scheduleType"].is_null() {
            match parse_schedule(&args) {
                Ok(s) => patch.schedule = Some(s),
                Err(e) => return Ok(error_envelope(&e)),
            }
        }
        if !args["payloadType"].is_null() || !args["message"].is_null() {
            match parse_payload(&args) {
                Ok(p) => patch.payload = Some(p),
                Err(e) => return Ok(error_envelope(&e)),
            }
        }

        match self.service.update(job_id, patch).await {
            Ok(job) => Ok(format!(
                "Job updated: {}",
                serde_json::to_string_pretty(&render_job(&job)).unwrap_or_default()
            )),
            Err(mozi_cron::CronError::JobNotFound(id)) => {
                Ok(error_envelope(&format!("job not found: {id}")))
            }
            Err(e) => Err(ToolError::ExecutionError(e.to_string())),
        }
    }
}

pub struct CronRunTool {
    service: Arc<SchedulerService>,
}

impl CronRunTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CronRunTool {
    fn name(&self) -> &str {
        "cron_run"
    }

    fn description(&self) -> &str {
        "Force an immediate run of a job, independent of its regular schedule."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "jobId": { "type": "string" } },
            "required": ["jobId"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let Some(job_id) = args["jobId"].as_str() else {
            return Ok(error_envelope("jobId is required"));
        };

        match self.service.run(job_id).await {
            Ok(result) => {
                let status = match result.status {
                    RunStatus::Ok => "ok",
                    RunStatus::Error => "error",
                    RunStatus::Skipped => "skipped",
                };
                let mut summary = format!("Run status: {status}");
                if let Some(text) = &result.summary {
                    summary.push_str(&format!("\n{text}"));
                }
                if let Some(err) = &result.error {
                    summary.push_str(&format!("\nError: {err}"));
                }
                Ok(summary)
            }
            Err(mozi_cron::CronError::JobNotFound(id)) => {
                Ok(error_envelope(&format!("job not found: {id}")))
            }
            Err(e) => Err(ToolError::ExecutionError(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_unit_conversion_matches_fixed_factors() {
        assert_eq!(every_ms_from_unit("seconds", 5).unwrap(), 5_000);
        assert_eq!(every_ms_from_unit("minutes", 2).unwrap(), 120_000);
        assert_eq!(every_ms_from_unit("hours", 1).unwrap(), 3_600_000);
        assert_eq!(every_ms_from_unit("days", 1).unwrap(), 86_400_000);
    }

    #[test]
    fn deliver_without_channel_is_rejected() {
        let args = json!({
            "message": "hi",
            "deliver": true
        });
        assert!(parse_payload(&args).is_err());
    }

    #[test]
    fn timeout_seconds_out_of_range_is_rejected() {
        let args = json!({ "message": "hi", "timeoutSeconds": 0 });
        assert!(parse_payload(&args).is_err());
        let args = json!({ "message": "hi", "timeoutSeconds": 601 });
        assert!(parse_payload(&args).is_err());
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let args = json!({ "message": "hi", "deliver": true, "channel": "telegram", "to": "u1" });
        assert!(parse_payload(&args).is_err());
    }

    #[test]
    fn at_schedule_in_the_past_is_rejected() {
        let args = json!({ "scheduleType": "at", "atMs": 1_i64 });
        assert!(parse_schedule(&args).is_err());
    }

    #[test]
    fn at_schedule_in_the_future_is_accepted() {
        let far_future = SystemClock.now_ms() + 86_400_000;
        let args = json!({ "scheduleType": "at", "atMs": far_future });
        assert_eq!(parse_schedule(&args).unwrap(), Schedule::At { at_ms: far_future });
    }
}
