//! HTTP surface of a node
//!
//! Serves the peer command handlers, the sensor endpoints read by the UI and
//! companion app, the panel's reminder list and the notification history.

use super::protocol::{
    Ack, AddReminderRequest, ClipRequest, CommandRequest, DeleteReminderRequest,
    EditReminderRequest, PasswordRequest, SensorEventRequest, SensorTestRequest,
};
use super::PeerCommand;
use crate::config::NodeRole;
use crate::error::NodeError;
use crate::input::{HoldStatus, InputEvent};
use crate::mode::UiAction;
use crate::node::NodeContext;
use crate::notifications::Severity;
use crate::reminders::{parse_time, ReminderStore, RemindersBody};
use crate::sensors::{
    InboundOutcome, SensorEvent, SensorKind, SensorSettingsUpdate, SensorSnapshot, SensorState,
};
use anyhow::Result;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_EVENTS_LIMIT: usize = 10;
const DEFAULT_NOTIFICATIONS_LIMIT: usize = 50;

// --- Error Handling ---
pub enum AppError {
    MalformedBody(String),
    Node(NodeError),
    /// The endpoint exists but this node's role does not serve it
    NotOnThisRole(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedBody(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::MalformedBody(rejection.body_text())
    }
}

impl From<NodeError> for AppError {
    fn from(err: NodeError) -> Self {
        AppError::Node(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::MalformedBody(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "status": "error", "error": msg }),
            ),
            AppError::NotOnThisRole(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "status": "error", "error": msg }),
            ),
            AppError::Node(err) => {
                let status = match &err {
                    NodeError::UnknownSensor(_)
                    | NodeError::UnknownCommand(_)
                    | NodeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    NodeError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    NodeError::Rejected { .. } => StatusCode::CONFLICT,
                    NodeError::SubprocessFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    NodeError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                };
                let label = match &err {
                    NodeError::UnknownCommand(_)
                    | NodeError::Rejected { .. }
                    | NodeError::SubprocessFailure(_) => "rejected",
                    _ => "error",
                };
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", err);
                }
                (
                    status,
                    json!({ "status": label, "reason": err.reason(), "error": err.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// --- Sensors ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorStatusEntry {
    #[serde(flatten)]
    snapshot: SensorSnapshot,
    device_connected: bool,
}

async fn sensor_status(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let connected = ctx.device.is_connected();
    let entry = |kind| SensorStatusEntry {
        snapshot: ctx.engine.status(kind),
        device_connected: connected,
    };
    Json(json!({
        "water": entry(SensorKind::Water),
        "gas": entry(SensorKind::Gas),
        "device": ctx.device.status(),
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn sensor_history(
    State(ctx): State<Arc<NodeContext>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query?;
    let history = ctx.log.history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    Ok(Json(json!({ "count": history.len(), "history": history })))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    n: Option<usize>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn sensor_events(
    State(ctx): State<Arc<NodeContext>>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query?;
    let kind = query
        .kind
        .as_deref()
        .map(str::parse::<SensorKind>)
        .transpose()?;
    let events = ctx.log.recent(query.n.unwrap_or(DEFAULT_EVENTS_LIMIT), kind);
    Ok(Json(json!({ "count": events.len(), "events": events })))
}

async fn get_sensor_config(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "config": ctx.engine.settings() }))
}

async fn update_sensor_config(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<SensorSettingsUpdate>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(update) = payload?;
    let settings = ctx.engine.update_settings(update);
    Ok(Json(json!({ "status": "ok", "config": settings })))
}

/// Always answers 200; the body says whether the event was acted on
async fn sensor_event(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<SensorEventRequest>, JsonRejection>,
) -> Json<serde_json::Value> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return Json(json!({ "status": "error", "error": rejection.body_text() }));
        }
    };
    let source = request.source.unwrap_or_else(|| "unknown".to_string());

    let Some(event) = SensorEvent::parse(&request.event) else {
        tracing::warn!("Unknown sensor event {:?} from {}", request.event, source);
        return Json(json!({ "status": "ignored", "reason": "unknown_event" }));
    };
    tracing::info!("Sensor event {} from {}", event.as_str(), source);

    let now = Utc::now();
    match ctx.role {
        NodeRole::Hub => match ctx.dispatcher.relay_inbound(event, &source, now) {
            InboundOutcome::Processed => {
                Json(json!({ "status": "processed", "event": event.as_str() }))
            }
            InboundOutcome::Cooldown => Json(json!({ "status": "ignored", "reason": "cooldown" })),
        },
        NodeRole::Panel => {
            let kind = event.kind();
            match ctx.dispatcher.report(kind, event.state(), now) {
                Some(transition) => Json(json!({
                    "status": "processed",
                    "event": event.as_str(),
                    "from": transition.from,
                    "to": transition.to,
                })),
                None => {
                    let reason = if ctx.engine.status(kind).enabled {
                        "no_change"
                    } else {
                        "disabled"
                    };
                    Json(json!({ "status": "ignored", "reason": reason }))
                }
            }
        }
    }
}

async fn sensor_test(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<SensorTestRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = payload?;
    let kind: SensorKind = request.sensor.parse()?;
    let state: SensorState = request.state.parse()?;

    tracing::info!("Injecting test sample: {} = {:?}", kind, state);
    let transition = ctx.dispatcher.report(kind, state, Utc::now());
    Ok(Json(json!({
        "status": "ok",
        "transition": transition.is_some(),
        "state": ctx.engine.state(kind),
    })))
}

async fn reset_sensor_alerts(State(ctx): State<Arc<NodeContext>>) -> Json<Ack> {
    ctx.engine.reset_all(Utc::now());
    ctx.notifications
        .add("SENSORS RESET", "All sensor alerts cleared", Severity::Info);
    Json(Ack::ok("All sensor alerts reset"))
}

// --- Mode ---

async fn peer_command(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = payload?;
    let command: PeerCommand = request.command.parse().map_err(|e: NodeError| {
        tracing::warn!("Rejected peer command: {}", e);
        e
    })?;
    let state = ctx.mode.peer_command(command).await?;
    Ok(Json(json!({
        "status": "ok",
        "command": command.as_str(),
        "mode": state.current_mode,
    })))
}

async fn check_password(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    if ctx.mode.check_password(request.password).await? {
        Ok((StatusCode::OK, Json(json!({ "status": "ok", "valid": true }))).into_response())
    } else {
        Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "valid": false, "error": "Incorrect password" })),
        )
            .into_response())
    }
}

async fn health(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let state = ctx.mode.snapshot();
    Json(json!({
        "status": "ok",
        "role": ctx.role.as_str(),
        "node": ctx.name,
        "mode": state.current_mode,
        "state": state,
        "deviceConnected": ctx.device.is_connected(),
        "peerConnected": ctx.peer_status.is_connected(),
        "peer": ctx.peer_status.snapshot(),
    }))
}

async fn current_stream(State(ctx): State<Arc<NodeContext>>) -> Json<serde_json::Value> {
    let state = ctx.mode.snapshot();
    Json(json!({
        "stream": state.current_stream,
        "playing": !state.current_stream.is_empty(),
    }))
}

async fn record_video(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<ClipRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = payload?;
    let reason = request.reason.unwrap_or_else(|| "manual".to_string());
    let source = request.source.unwrap_or_else(|| "unknown".to_string());
    tracing::info!("Clip requested by {} ({})", source, reason);
    ctx.notifications.add(
        "VIDEO",
        &format!("Clip requested by {} ({})", source, reason),
        Severity::Info,
    );
    Ok(Json(Ack::ok("Clip request accepted")))
}

async fn input(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<InputEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let Json(event) = payload?;
    let Some(input) = &ctx.input else {
        return Err(AppError::NotOnThisRole("No input loop on this node".to_string()));
    };
    if input.send(event) {
        Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
    } else {
        Err(AppError::Node(NodeError::InvalidInput("input queue full".to_string())))
    }
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    action_id: String,
}

async fn input_progress(
    State(ctx): State<Arc<NodeContext>>,
    query: Result<Query<ProgressQuery>, QueryRejection>,
) -> ApiResult<Json<HoldStatus>> {
    let Query(query) = query?;
    let Some(input) = &ctx.input else {
        return Err(AppError::NotOnThisRole("No input loop on this node".to_string()));
    };
    Ok(Json(input.hold_status(&query.action_id)))
}

// --- Reminders ---

fn reminder_store(ctx: &NodeContext) -> ApiResult<&Arc<ReminderStore>> {
    ctx.reminders
        .as_ref()
        .ok_or_else(|| AppError::NotOnThisRole("Reminders are kept on the panel".to_string()))
}

async fn reminders(State(ctx): State<Arc<NodeContext>>) -> ApiResult<Json<RemindersBody>> {
    Ok(Json(reminder_store(&ctx)?.body()))
}

async fn add_reminder(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<AddReminderRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = payload?;
    let store = reminder_store(&ctx)?;
    let time = request.time.as_deref().map(parse_time).transpose()?.flatten();
    let reminder = store.add(&request.task, time)?;
    tracing::info!("Reminder added: {:?}", reminder.task);

    // Unscheduled reminders open straight in the time editor
    if reminder.time.is_none() {
        store.begin_edit_id(reminder.id, Local::now().time())?;
        ctx.mode.action(UiAction::OpenTimeEditor).await?;
    }
    Ok(Json(json!({
        "status": "added",
        "task": reminder.task,
        "reminder": reminder,
    })))
}

async fn edit_reminder(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<EditReminderRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = payload?;
    let time = parse_time(&request.time)?;
    let reminder = reminder_store(&ctx)?.set_time(request.id, time)?;
    Ok(Json(json!({ "status": "ok", "reminder": reminder })))
}

async fn delete_reminder(
    State(ctx): State<Arc<NodeContext>>,
    payload: Result<Json<DeleteReminderRequest>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(request) = payload?;
    let reminder = reminder_store(&ctx)?.delete(request.id)?;
    tracing::info!("Reminder deleted: {:?}", reminder.task);
    Ok(Json(json!({ "status": "deleted", "reminder": reminder })))
}

// --- Notifications ---

#[derive(Debug, Deserialize)]
struct NotificationsQuery {
    limit: Option<usize>,
}

async fn notifications(
    State(ctx): State<Arc<NodeContext>>,
    query: Result<Query<NotificationsQuery>, QueryRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Query(query) = query?;
    let entries = ctx
        .notifications
        .recent(query.limit.unwrap_or(DEFAULT_NOTIFICATIONS_LIMIT));
    Ok(Json(json!({ "count": entries.len(), "notifications": entries })))
}

async fn clear_notifications(State(ctx): State<Arc<NodeContext>>) -> Json<Ack> {
    ctx.notifications.clear();
    tracing::info!("Notifications cleared");
    Json(Ack::ok("Notifications cleared"))
}

/// Build the node's router
pub fn router(ctx: Arc<NodeContext>) -> Router {
    let body_limit = ctx.config.channel.body_limit_kb * 1024;

    Router::new()
        .route("/health", get(health))
        .route("/sensor_event", post(sensor_event))
        .route("/sensor_status", get(sensor_status))
        .route("/sensor_history", get(sensor_history))
        .route("/sensor_events", get(sensor_events))
        .route(
            "/sensor_config",
            get(get_sensor_config).post(update_sensor_config),
        )
        .route("/sensor_test", post(sensor_test))
        .route("/reset_sensor_alerts", post(reset_sensor_alerts))
        .route("/peer_command", post(peer_command))
        .route("/check_password", post(check_password))
        .route("/current_stream", get(current_stream))
        .route("/record_video", post(record_video))
        .route("/input", post(input))
        .route("/input/progress", get(input_progress))
        .route("/reminders", get(reminders))
        .route("/add_reminder", post(add_reminder))
        .route("/edit_reminder", post(edit_reminder))
        .route("/delete_reminder", post(delete_reminder))
        .route("/api/notifications", get(notifications))
        .route("/api/notifications/clear", post(clear_notifications))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// Serve `router` on an already-bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
            tracing::info!("HTTP server shutting down gracefully");
        })
        .await?;

    Ok(())
}
