use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use mozi_core::metrics::{MetricsStore, MetricsSnapshot};
use tokio::sync::mpsc;
use mozi_core::bus::{Event, MessageBus};
use mozi_core::channel::{target_personal_channels, native_supported_channels};
use mozi_core::types::{Message, Role};
use mozi_cron::{CreateJob, JobPatch, SchedulerService};
use mozi_persistence::SqliteSessionStore;
use mozi_webchat::WebchatChannel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use uuid::Uuid;
use tokio::sync::broadcast::error::RecvError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use axum::body::Bytes;

type HmacSha256 = Hmac<Sha256>;

const ROLLING_WINDOW_MINUTES: usize = 60;

#[derive(Debug, Clone, Copy)]
pub struct GatewayRuntimeConfig {
    pub ws_heartbeat_secs: u64,
    pub health_window_minutes: usize,
    pub dedupe_max_entries: usize,
}

impl Default for GatewayRuntimeConfig {
    fn default() -> Self {
        Self {
            ws_heartbeat_secs: 15,
            health_window_minutes: 60,
            dedupe_max_entries: 2048,
        }
    }
}

#[derive(Debug, Clone)]
struct RollingMinuteCounter {
    buckets: [u32; ROLLING_WINDOW_MINUTES],
    cursor: usize,
    last_minute: i64,
}

impl Default for RollingMinuteCounter {
    fn default() -> Self {
        Self {
            buckets: [0; ROLLING_WINDOW_MINUTES],
            cursor: 0,
            last_minute: 0,
        }
    }
}

impl RollingMinuteCounter {
    fn minute_index(epoch_ms: i64) -> i64 {
        epoch_ms / 60_000
    }

    fn advance_to(&mut self, now_ms: i64) {
        let now_minute = Self::minute_index(now_ms);
        if self.last_minute == 0 {
            self.last_minute = now_minute;
            return;
        }

        let delta = now_minute - self.last_minute;
        if delta <= 0 {
            return;
        }

        if delta as usize >= ROLLING_WINDOW_MINUTES {
            self.buckets = [0; ROLLING_WINDOW_MINUTES];
            self.cursor = 0;
        } else {
            for _ in 0..delta {
                self.cursor = (self.cursor + 1) % ROLLING_WINDOW_MINUTES;
                self.buckets[self.cursor] = 0;
            }
        }

        self.last_minute = now_minute;
    }

    fn observe(&mut self, now_ms: i64) {
        self.advance_to(now_ms);
        self.buckets[self.cursor] = self.buckets[self.cursor].saturating_add(1);
    }

    fn sum_recent_minutes(&mut self, now_ms: i64, minutes: usize) -> u64 {
        self.advance_to(now_ms);
        let take = minutes.clamp(1, ROLLING_WINDOW_MINUTES);
        (0..take)
            .map(|offset| {
                let idx = (self.cursor + ROLLING_WINDOW_MINUTES - offset) % ROLLING_WINDOW_MINUTES;
                self.buckets[idx] as u64
            })
            .sum()
    }
}

#[derive(Debug, Default)]
struct DedupeCache {
    entries: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

#[derive(Debug, Clone, Serialize, Default)]
struct ChannelRuntimeStats {
    last_inbound_at_ms: Option<i64>,
    last_outbound_at_ms: Option<i64>,
    error_count: u64,
    last_error: Option<String>,
    last_error_at_ms: Option<i64>,
    #[serde(skip)]
    inbound_rolling_1h: RollingMinuteCounter,
    #[serde(skip)]
    outbound_rolling_1h: RollingMinuteCounter,
    #[serde(skip)]
    error_rolling_1h: RollingMinuteCounter,
}

#[derive(Clone)]
struct AppState {
    bus: Arc<MessageBus>,
    /// If set, all mutating endpoints require `Authorization: Bearer <token>`
    auth_token: Option<String>,
    metrics: Arc<MetricsStore>,
    reload_tx: mpsc::Sender<()>,
    sessions: SqliteSessionStore,
    cron: Arc<SchedulerService>,
    webchat: Arc<WebchatChannel>,
    /// Shared HMAC-SHA256 secret checked against inbound channel webhooks.
    /// One secret for every channel (spec carries no per-platform signature
    /// schemes); `None` falls back to `check_auth`.
    webhook_secret: Option<String>,
    configured_channels: Vec<String>,
    runtime: GatewayRuntimeConfig,
    channel_stats: Arc<tokio::sync::Mutex<HashMap<String, ChannelRuntimeStats>>>,
    dedupe_cache: Arc<tokio::sync::Mutex<DedupeCache>>,
}

pub struct Gateway {
    bus: Arc<MessageBus>,
    port: u16,
    /// Optional auth token. If None, gateway binds to 127.0.0.1 only.
    auth_token: Option<String>,
    metrics: Arc<MetricsStore>,
    reload_tx: mpsc::Sender<()>,
    sessions: SqliteSessionStore,
    cron: Arc<SchedulerService>,
    webchat: Arc<WebchatChannel>,
    webhook_secret: Option<String>,
    configured_channels: Vec<String>,
    runtime: GatewayRuntimeConfig,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    uptime: &'static str,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    message: String,
    #[serde(default = "default_session_key")]
    session_key: String,
}

fn default_session_key() -> String {
    format!("http:{}", Uuid::new_v4())
}

#[derive(Serialize)]
struct SendMessageResponse {
    id: String,
    status: &'static str,
}

#[derive(Serialize)]
#[allow(dead_code)]
struct ErrorResponse {
    error: String,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        port: u16,
        metrics: Arc<MetricsStore>,
        reload_tx: mpsc::Sender<()>,
        sessions: SqliteSessionStore,
        cron: Arc<SchedulerService>,
        webchat: Arc<WebchatChannel>,
        webhook_secret: Option<String>,
        configured_channels: Vec<String>,
        runtime: GatewayRuntimeConfig,
    ) -> Self {
        Self {
            bus,
            port,
            auth_token: None,
            metrics,
            reload_tx,
            sessions,
            cron,
            webchat,
            webhook_secret,
            configured_channels,
            runtime,
        }
    }

    /// Create gateway with auth token. If token is set, binds to 0.0.0.0.
    /// If no token, binds to 127.0.0.1 (local-only) for safety.
    #[allow(clippy::too_many_arguments)]
    pub fn with_auth(
        bus: Arc<MessageBus>,
        port: u16,
        auth_token: Option<String>,
        metrics: Arc<MetricsStore>,
        reload_tx: mpsc::Sender<()>,
        sessions: SqliteSessionStore,
        cron: Arc<SchedulerService>,
        webchat: Arc<WebchatChannel>,
        webhook_secret: Option<String>,
        configured_channels: Vec<String>,
        runtime: GatewayRuntimeConfig,
    ) -> Self {
        Self {
            bus,
            port,
            auth_token,
            metrics,
            reload_tx,
            sessions,
            cron,
            webchat,
            webhook_secret,
            configured_channels,
            runtime,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        let channel_stats: Arc<tokio::sync::Mutex<HashMap<String, ChannelRuntimeStats>>> =
            Arc::new(tokio::sync::Mutex::new(HashMap::new()));
        let dedupe_cache = Arc::new(tokio::sync::Mutex::new(DedupeCache::default()));

        // Monitor bus events to keep channel runtime health fresh.
        {
            let stats = channel_stats.clone();
            let mut rx = self.bus.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(Event::InboundMessage(msg)) => {
                            let channel = resolve_channel_from_message(&msg);
                            let mut lock = stats.lock().await;
                            let entry = lock.entry(channel).or_default();
                            let now = now_ms_epoch();
                            entry.last_inbound_at_ms = Some(now);
                            entry.inbound_rolling_1h.observe(now);
                        }
                        Ok(Event::OutboundMessage(msg)) => {
                            let channel = resolve_channel_from_message(&msg);
                            let mut lock = stats.lock().await;
                            let entry = lock.entry(channel).or_default();
                            let now = now_ms_epoch();
                            entry.last_outbound_at_ms = Some(now);
                            entry.outbound_rolling_1h.observe(now);
                        }
                        Ok(Event::SystemLog { .. }) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            let mut lock = stats.lock().await;
                            let entry = lock.entry("gateway".to_string()).or_default();
                            let now = now_ms_epoch();
                            entry.error_count += 1;
                            entry.last_error = Some(format!("bus_lagged: {}", skipped));
                            entry.last_error_at_ms = Some(now);
                            entry.error_rolling_1h.observe(now);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }

        let state = AppState {
            bus: self.bus.clone(),
            auth_token: self.auth_token.clone(),
            metrics: self.metrics.clone(),
            reload_tx: self.reload_tx.clone(),
            sessions: self.sessions.clone(),
            cron: self.cron.clone(),
            webchat: self.webchat.clone(),
            webhook_secret: self.webhook_secret.clone(),
            configured_channels: self.configured_channels.clone(),
            runtime: self.runtime,
            channel_stats,
            dedupe_cache,
        };

        let app = Router::new()
            .route("/health", get(health_check))
            .route("/api/status", get(api_status))
            .route("/api/message", post(send_message))
            .route("/api/control/reload", put(reload_config))
            .route("/api/monitor/metrics", get(get_metrics))
            .route("/api/sessions", get(list_sessions))
            .route("/api/sessions/:session_key/messages", get(get_session_messages))
            .route("/api/sessions/send", post(send_session_message))
            .route("/api/channels/dingtalk/inbound", post(dingtalk_inbound))
            .route("/api/channels/feishu/inbound", post(feishu_inbound))
            .route("/api/channels/qq/inbound", post(qq_inbound))
            .route("/api/channels/wecom/inbound", post(wecom_inbound))
            .route("/api/channels/health", get(channel_health))
            .route("/api/cron/jobs", get(cron_list_jobs).post(cron_add_job))
            .route(
                "/api/cron/jobs/:job_id",
                get(cron_get_job).put(cron_update_job).delete(cron_remove_job),
            )
            .route("/api/cron/jobs/:job_id/run", post(cron_run_job))
            .route("/ws/events", get(ws_events))
            .route("/ws/webchat/:session_key", get(ws_webchat))
            .with_state(state);

        // Security: bind to localhost-only if no auth token configured
        let addr = if self.auth_token.is_some() {
            SocketAddr::from(([0, 0, 0, 0], self.port))
        } else {
            warn!("No gateway auth token configured — binding to 127.0.0.1 only");
            SocketAddr::from(([127, 0, 0, 1], self.port))
        };

        info!("Gateway listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Verify the Authorization header against the configured token.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected_token) = &state.auth_token else {
        // No auth configured = local-only, all requests allowed
        return Ok(());
    };

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let provided_token = auth_header.strip_prefix("Bearer ").unwrap_or("");

    if provided_token == expected_token {
        Ok(())
    } else {
        warn!("Unauthorized gateway access attempt");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Verify an inbound channel webhook. If `webhook_secret` is configured,
/// requires a valid `X-Mozi-Signature: <hex hmac-sha256 of the raw body>`
/// header — the same scheme across every channel, rather than each
/// platform's native signing convention. Falls back to `check_auth`
/// (bearer token) when no secret is configured.
async fn verify_webhook(
    state: &AppState,
    channel: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), StatusCode> {
    let Some(secret) = &state.webhook_secret else {
        return check_auth(state, headers);
    };

    let provided = headers
        .get("x-mozi-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let expected_hex = expected.iter().map(|b| format!("{:02x}", b)).collect::<String>();

    if provided.eq_ignore_ascii_case(&expected_hex) {
        Ok(())
    } else {
        warn!("Webhook signature verification failed for channel {}", channel);
        record_channel_error(state, channel, "webhook_signature_invalid").await;
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: "0.1.0",
    })
}

fn now_ms_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn resolve_channel_from_message(msg: &Message) -> String {
    if let Some((prefix, _rest)) = msg.session_key.split_once(':') {
        let known = target_personal_channels();
        if known.contains(&prefix) {
            return prefix.to_string();
        }
    }
    msg.channel.clone()
}

async fn record_channel_error(state: &AppState, channel: &str, error: impl Into<String>) {
    let mut stats = state.channel_stats.lock().await;
    let entry = stats.entry(channel.to_string()).or_default();
    let now = now_ms_epoch();
    entry.error_count += 1;
    entry.last_error = Some(error.into());
    entry.last_error_at_ms = Some(now);
    entry.error_rolling_1h.observe(now);
}

async fn api_status(State(_state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        version: "0.1.0",
        uptime: "N/A",
    })
}

/// POST /api/message — send a message to the agent via HTTP
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, StatusCode> {
    // Auth check
    check_auth(&state, &headers)?;

    let msg_id = Uuid::new_v4();

    let msg = Message::new(
        "http",
        &req.session_key,
        Role::User,
        &req.message,
    ).with_sender("http_client");

    state
        .bus
        .publish(Event::InboundMessage(msg))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(SendMessageResponse {
        id: msg_id.to_string(),
        status: "accepted",
    }))
}


async fn reload_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    info!("Control request: Config reload triggered");
    state.reload_tx.send(()).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "status": "reload_triggered" })))
}

async fn get_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MetricsSnapshot>, StatusCode> {
    check_auth(&state, &headers)?;
    Ok(Json(state.metrics.snapshot()))
}

async fn channel_health(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;

    let configured = state.configured_channels.clone();
    let native = native_supported_channels()
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();

    let now_ms = now_ms_epoch();
    let mut stats_lock = state.channel_stats.lock().await;
    let window_minutes = state
        .runtime
        .health_window_minutes
        .clamp(1, ROLLING_WINDOW_MINUTES);

    let channels = target_personal_channels()
        .iter()
        .map(|ch| {
            let name = (*ch).to_string();
            let is_configured = configured.iter().any(|c| c == ch);
            let is_native = native.iter().any(|c| c == ch);
            let runtime = stats_lock.entry(name.clone()).or_default();
            let inbound_1h = runtime
                .inbound_rolling_1h
                .sum_recent_minutes(now_ms, window_minutes);
            let outbound_1h = runtime
                .outbound_rolling_1h
                .sum_recent_minutes(now_ms, window_minutes);
            let errors_1h = runtime
                .error_rolling_1h
                .sum_recent_minutes(now_ms, window_minutes);
            let stability = if errors_1h >= 5 {
                "unstable"
            } else if errors_1h > 0 {
                "degraded"
            } else if inbound_1h + outbound_1h == 0 {
                "idle"
            } else {
                "healthy"
            };
            let adapter_status = if is_configured && is_native {
                "running"
            } else if is_configured && !is_native {
                "configured_pending_adapter"
            } else {
                "disabled"
            };
            json!({
                "channel": name,
                "configured": is_configured,
                "native_supported": is_native,
                "status": adapter_status,
                "last_inbound_at_ms": runtime.last_inbound_at_ms,
                "last_outbound_at_ms": runtime.last_outbound_at_ms,
                "error_count": runtime.error_count,
                "last_error": runtime.last_error,
                "last_error_at_ms": runtime.last_error_at_ms,
                "trend_1h": {
                    "window_minutes": window_minutes,
                    "inbound_count": inbound_1h,
                    "outbound_count": outbound_1h,
                    "error_count": errors_1h,
                    "stability": stability
                }
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "channels": channels,
        "configured_count": configured.len(),
        "native_supported_count": native.len(),
    })))
}

async fn ws_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    check_auth(&state, &headers)?;

    let bus = state.bus.clone();
    let metrics = state.metrics.clone();
    let ws_heartbeat_secs = state.runtime.ws_heartbeat_secs.max(3);
    Ok(ws.on_upgrade(move |socket| handle_ws_events(socket, bus, metrics, ws_heartbeat_secs)))
}

#[derive(Deserialize)]
struct SessionListQuery {
    #[serde(default = "default_sessions_limit")]
    limit: i64,
}

fn default_sessions_limit() -> i64 {
    20
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    let limit = query.limit.clamp(1, 100);
    let sessions = state
        .sessions
        .list_sessions(limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Deserialize)]
struct SessionMessagesQuery {
    #[serde(default = "default_messages_limit")]
    limit: i64,
}

fn default_messages_limit() -> i64 {
    100
}

async fn get_session_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_key): Path<String>,
    Query(query): Query<SessionMessagesQuery>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    let limit = query.limit.clamp(1, 500);
    let messages = state
        .sessions
        .get_history(&session_key, limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "session_key": session_key, "messages": messages })))
}

#[derive(Deserialize)]
struct SessionSendRequest {
    session_key: String,
    message: String,
    #[serde(default = "default_session_send_channel")]
    channel: String,
}

fn default_session_send_channel() -> String {
    "api.sessions".to_string()
}

async fn send_session_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SessionSendRequest>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    let inbound = Message::new(&req.channel, &req.session_key, Role::User, &req.message)
        .with_sender("api_session_send");
    state
        .bus
        .publish(Event::InboundMessage(inbound))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "status": "accepted", "session_key": req.session_key })))
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Returns true if `key` was already seen within `ttl_secs`, recording it if not.
/// Bounds the cache by evicting the oldest entry past `DEDUPE_CACHE_CAPACITY`.
const DEDUPE_CACHE_CAPACITY: usize = 4096;

async fn dedupe_seen(state: &AppState, key: &str, ttl_secs: i64) -> bool {
    let now = now_epoch_secs();
    let mut cache = state.dedupe_cache.lock().await;

    if let Some(seen_at) = cache.entries.get(key).copied() {
        if now - seen_at < ttl_secs {
            return true;
        }
    }

    cache.entries.insert(key.to_string(), now);
    cache.order.push_back((key.to_string(), now));

    while cache.order.len() > DEDUPE_CACHE_CAPACITY {
        if let Some((old_key, old_at)) = cache.order.pop_front() {
            if cache.entries.get(&old_key) == Some(&old_at) {
                cache.entries.remove(&old_key);
            }
        } else {
            break;
        }
    }

    false
}

#[derive(Deserialize)]
struct DingtalkInboundRequest {
    #[serde(rename = "senderId")]
    sender_id: String,
    text: DingtalkInboundText,
    #[serde(default)]
    #[serde(rename = "msgId")]
    msg_id: Option<String>,
}

#[derive(Deserialize)]
struct DingtalkInboundText {
    content: String,
}

/// POST /api/channels/dingtalk/inbound — DingTalk custom-robot callback body.
async fn dingtalk_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    verify_webhook(&state, "dingtalk", &headers, &body).await?;
    let req: DingtalkInboundRequest =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let session_key = format!("dingtalk:{}", req.sender_id);
    if let Some(msg_id) = req.msg_id.as_deref() {
        let key = format!("dingtalk:{}", msg_id);
        if dedupe_seen(&state, &key, 600).await {
            return Ok(Json(json!({ "status": "duplicate_ignored", "session_key": session_key })));
        }
    }

    let inbound = Message::new("dingtalk", &session_key, Role::User, &req.text.content)
        .with_sender(&req.sender_id);

    state
        .bus
        .publish(Event::InboundMessage(inbound))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "status": "accepted", "session_key": session_key })))
}

#[derive(Deserialize)]
struct FeishuEventEnvelope {
    #[serde(default)]
    challenge: Option<String>,
    #[serde(rename = "type", default)]
    envelope_type: Option<String>,
    #[serde(default)]
    event: Option<FeishuMessageEvent>,
}

#[derive(Deserialize)]
struct FeishuMessageEvent {
    sender: FeishuSender,
    message: FeishuMessage,
}

#[derive(Deserialize)]
struct FeishuSender {
    sender_id: FeishuSenderId,
}

#[derive(Deserialize)]
struct FeishuSenderId {
    open_id: String,
}

#[derive(Deserialize)]
struct FeishuMessage {
    message_id: String,
    content: String,
}

/// POST /api/channels/feishu/inbound — handles Feishu's URL verification
/// handshake and its event-callback envelope for text messages.
async fn feishu_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    // The URL-verification handshake arrives unsigned, before a secret is
    // ever exchanged with the platform, so it must be inspected before the
    // HMAC check runs.
    let probe: FeishuEventEnvelope =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    if probe.envelope_type.as_deref() == Some("url_verification") {
        return Ok(Json(json!({ "challenge": probe.challenge.unwrap_or_default() })));
    }

    verify_webhook(&state, "feishu", &headers, &body).await?;
    let req = probe;

    let Some(event) = req.event else {
        return Ok(Json(json!({ "status": "ignored_non_message_event" })));
    };

    // Feishu nests the text body as a JSON-encoded string: {"text":"..."}
    let text = serde_json::from_str::<Value>(&event.message.content)
        .ok()
        .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(str::to_string))
        .unwrap_or(event.message.content);

    let session_key = format!("feishu:{}", event.sender.sender_id.open_id);
    let dedupe_key = format!("feishu:{}", event.message.message_id);
    if dedupe_seen(&state, &dedupe_key, 600).await {
        return Ok(Json(json!({ "status": "duplicate_ignored", "session_key": session_key })));
    }

    let mut inbound = Message::new("feishu", &session_key, Role::User, &text)
        .with_sender(&event.sender.sender_id.open_id);
    inbound
        .metadata
        .insert("feishu_message_id".to_string(), event.message.message_id);

    state
        .bus
        .publish(Event::InboundMessage(inbound))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "status": "accepted", "session_key": session_key })))
}

#[derive(Deserialize)]
struct QqInboundRequest {
    #[serde(rename = "authorId")]
    author_id: String,
    content: String,
    #[serde(default)]
    id: Option<String>,
}

/// POST /api/channels/qq/inbound — QQ bot gateway `AT_MESSAGE_CREATE`-style
/// payload, simplified to the fields this gateway needs.
async fn qq_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    verify_webhook(&state, "qq", &headers, &body).await?;
    let req: QqInboundRequest =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let session_key = format!("qq:{}", req.author_id);
    if let Some(id) = req.id.as_deref() {
        let key = format!("qq:{}", id);
        if dedupe_seen(&state, &key, 600).await {
            return Ok(Json(json!({ "status": "duplicate_ignored", "session_key": session_key })));
        }
    }

    let inbound = Message::new("qq", &session_key, Role::User, &req.content)
        .with_sender(&req.author_id);

    state
        .bus
        .publish(Event::InboundMessage(inbound))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "status": "accepted", "session_key": session_key })))
}

#[derive(Deserialize)]
struct WecomInboundRequest {
    from: String,
    text: String,
    #[serde(default)]
    #[serde(rename = "msgId")]
    msg_id: Option<String>,
}

/// POST /api/channels/wecom/inbound — WeCom group-robot callback shape.
async fn wecom_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    verify_webhook(&state, "wecom", &headers, &body).await?;
    let req: WecomInboundRequest =
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let session_key = format!("wecom:{}", req.from);
    if let Some(msg_id) = req.msg_id.as_deref() {
        let key = format!("wecom:{}", msg_id);
        if dedupe_seen(&state, &key, 600).await {
            return Ok(Json(json!({ "status": "duplicate_ignored", "session_key": session_key })));
        }
    }

    let inbound = Message::new("wecom", &session_key, Role::User, &req.text).with_sender(&req.from);

    state
        .bus
        .publish(Event::InboundMessage(inbound))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "status": "accepted", "session_key": session_key })))
}

/// GET /ws/webchat/:session_key — the embedded browser client's transport.
/// Registers the session with the in-process `WebchatChannel` so outbound
/// delivery (including cron `agentTurn` results) can reach this socket, and
/// forwards inbound text frames onto the bus as a `webchat:<session_key>` message.
async fn ws_webchat(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_webchat(socket, state, session_key))
}

async fn handle_ws_webchat(mut socket: WebSocket, state: AppState, session_key: String) {
    let chat_id = session_key.clone();
    let bus_session_key = format!("webchat:{}", session_key);
    let mut outbound_rx = state.webchat.connect(chat_id.clone()).await;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if socket.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let inbound = Message::new("webchat", &bus_session_key, Role::User, text.as_str())
                            .with_sender(&session_key);
                        if state.bus.publish(Event::InboundMessage(inbound)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.webchat.disconnect(&chat_id).await;
}

#[derive(Deserialize)]
struct CronListQuery {
    #[serde(default)]
    #[serde(rename = "includeDisabled")]
    include_disabled: bool,
}

/// GET /api/cron/jobs — mirrors the `cron_list` tool-facade operation.
async fn cron_list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CronListQuery>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    let jobs = state.cron.list(query.include_disabled).await;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn cron_get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    match state.cron.get(&job_id).await {
        Some(job) => Ok(Json(json!({ "job": job }))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// POST /api/cron/jobs — mirrors `cron_add`.
async fn cron_add_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateJob>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(code) = check_auth(&state, &headers) {
        return Err((code, Json(json!({ "error": "unauthorized" }))));
    }
    state
        .cron
        .add(req)
        .await
        .map(|job| Json(json!({ "job": job })))
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))))
}

/// PUT /api/cron/jobs/:job_id — mirrors `cron_update`.
async fn cron_update_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(code) = check_auth(&state, &headers) {
        return Err((code, Json(json!({ "error": "unauthorized" }))));
    }
    match state.cron.update(&job_id, patch).await {
        Ok(job) => Ok(Json(json!({ "job": job }))),
        Err(mozi_cron::CronError::JobNotFound(id)) => {
            Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("job not found: {id}") }))))
        }
        Err(e) => Err((StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))),
    }
}

/// DELETE /api/cron/jobs/:job_id — mirrors `cron_remove`.
async fn cron_remove_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    check_auth(&state, &headers)?;
    match state.cron.remove(&job_id).await {
        Ok(true) => Ok(Json(json!({ "status": "removed" }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/cron/jobs/:job_id/run — mirrors `cron_run`, forcing an
/// immediate execution independent of the job's regular schedule.
async fn cron_run_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Err(code) = check_auth(&state, &headers) {
        return Err((code, Json(json!({ "error": "unauthorized" }))));
    }
    match state.cron.run(&job_id).await {
        Ok(result) => Ok(Json(json!({ "result": result }))),
        Err(mozi_cron::CronError::JobNotFound(id)) => {
            Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("job not found: {id}") }))))
        }
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))),
    }
}


async fn handle_ws_events(
    mut socket: WebSocket,
    bus: Arc<MessageBus>,
    metrics: Arc<MetricsStore>,
    ws_heartbeat_secs: u64,
) {
    let mut rx = bus.subscribe();
    let mut ticker = interval(Duration::from_secs(ws_heartbeat_secs));

    let connected = json!({
        "type": "connected",
        "message": "event stream ready",
        "metrics": metrics.snapshot(),
    });

    if socket
        .send(WsMessage::Text(connected.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let heartbeat = json!({
                    "type": "heartbeat",
                    "metrics": metrics.snapshot(),
                });
                if socket.send(WsMessage::Text(heartbeat.to_string().into())).await.is_err() {
                    break;
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(Event::InboundMessage(message)) => {
                        let payload = json!({
                            "type": "inbound_message",
                            "message": message,
                        });
                        if socket.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::OutboundMessage(message)) => {
                        let payload = json!({
                            "type": "outbound_message",
                            "message": message,
                        });
                        if socket.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::SystemLog { level, message }) => {
                        let payload = json!({
                            "type": "system_log",
                            "level": level,
                            "message": message,
                        });
                        if socket.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let payload = json!({
                            "type": "lagged",
                            "skipped": skipped,
                        });
                        if socket.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
