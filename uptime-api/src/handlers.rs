use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uptime_core::{
    Error,
    events::{Event, publish_quietly},
    incidents::IncidentOutcome,
    models::{
        ChannelConfig, CheckResult, CheckStatus, Incident, IncidentStatus, IncidentUpdate,
        Monitor, MonitorStatus, PUSH_REGION,
    },
    notify::{DeliveryReport, DeliverySummary, NotificationMessage, Recipient, RecipientSource},
    queue::schedule_check,
};
use uuid::Uuid;

use crate::server::{ApiError, AppState, AuthUser};

const WEBHOOK_REGION: &str = "webhook";
/// Longest latency an inbound result may report: one hour.
const MAX_REPORTED_RESPONSE_MS: u64 = 3_600_000;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now()
    }))
}

async fn owned_monitor(state: &AppState, workspace_id: Uuid, id: Uuid) -> ApiResult<Monitor> {
    state
        .pipeline
        .store()
        .get_monitor(id)
        .await?
        .filter(|monitor| monitor.workspace_id == workspace_id)
        .ok_or_else(|| Error::not_found(format!("monitor {id}")).into())
}

async fn pushed_monitor(state: &AppState, token: &str) -> ApiResult<Monitor> {
    state
        .pipeline
        .store()
        .monitor_by_push_token(token)
        .await?
        .ok_or_else(|| Error::not_found("unknown push token").into())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    ok: bool,
    status: CheckStatus,
    incident_opened: bool,
    incident_resolved: bool,
}

async fn record_pushed(state: &AppState, monitor: &Monitor, result: CheckResult) -> ApiResult<Json<PushResponse>> {
    let recorded = state.pipeline.record(monitor, &result, Utc::now()).await?;
    Ok(Json(PushResponse {
        ok: true,
        status: recorded.check.status,
        incident_opened: matches!(recorded.incident, Some(IncidentOutcome::Opened(_))),
        incident_resolved: matches!(recorded.incident, Some(IncidentOutcome::Resolved(_))),
    }))
}

pub async fn push_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Json<PushResponse>> {
    let monitor = pushed_monitor(&state, &token).await?;
    info!(monitor_id = %monitor.id, "heartbeat received");
    record_pushed(&state, &monitor, CheckResult::up(0).in_region(PUSH_REGION)).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResultRequest {
    status: CheckStatus,
    #[serde(default)]
    response_time: u64,
    error: Option<String>,
    region: Option<String>,
}

impl PushResultRequest {
    fn into_result(self) -> Result<CheckResult, Error> {
        if self.response_time > MAX_REPORTED_RESPONSE_MS {
            return Err(Error::validation(format!(
                "responseTime must be at most {MAX_REPORTED_RESPONSE_MS} ms"
            )));
        }
        let region = self
            .region
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| WEBHOOK_REGION.to_string());
        let result = match self.status {
            CheckStatus::Up => CheckResult::up(self.response_time),
            CheckStatus::Down => CheckResult::down(
                self.error.unwrap_or_else(|| "reported down".to_string()),
                self.response_time,
            ),
        };
        Ok(result.in_region(region))
    }
}

pub async fn push_result(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(request): Json<PushResultRequest>,
) -> ApiResult<Json<PushResponse>> {
    let result = request.into_result()?;
    let monitor = pushed_monitor(&state, &token).await?;
    record_pushed(&state, &monitor, result).await
}

pub async fn check_now(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let monitor = owned_monitor(&state, claims.workspace_id, id).await?;
    let job_id = schedule_check(state.pipeline.queue().as_ref(), monitor.id, Duration::ZERO).await?;
    info!(monitor_id = %monitor.id, %job_id, "check requested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

async fn set_active(state: &AppState, monitor: Monitor, active: bool) -> ApiResult<Monitor> {
    let status = if active {
        MonitorStatus::Up
    } else {
        MonitorStatus::Paused
    };
    let store = state.pipeline.store();
    store.set_monitor_active(monitor.id, active, status).await?;
    if monitor.status != status {
        publish_quietly(
            state.events.as_ref(),
            monitor.workspace_id,
            Event::MonitorStatusChanged {
                monitor_id: monitor.id,
                from: monitor.status,
                to: status,
            },
        )
        .await;
    }
    store
        .get_monitor(monitor.id)
        .await?
        .ok_or_else(|| Error::not_found(format!("monitor {}", monitor.id)).into())
}

pub async fn pause_monitor(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Monitor>> {
    let monitor = owned_monitor(&state, claims.workspace_id, id).await?;
    let monitor = set_active(&state, monitor, false).await?;
    info!(monitor_id = %monitor.id, "monitor paused");
    Ok(Json(monitor))
}

pub async fn resume_monitor(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Monitor>> {
    let monitor = owned_monitor(&state, claims.workspace_id, id).await?;
    let monitor = set_active(&state, monitor, true).await?;
    schedule_check(state.pipeline.queue().as_ref(), monitor.id, Duration::ZERO).await?;
    info!(monitor_id = %monitor.id, "monitor resumed");
    Ok(Json(monitor))
}

#[derive(Debug, Serialize)]
pub struct IncidentTimeline {
    incident: Incident,
    updates: Vec<IncidentUpdate>,
}

pub async fn get_incident(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IncidentTimeline>> {
    let (incident, updates) = state
        .pipeline
        .incidents()
        .timeline(claims.workspace_id, id)
        .await?;
    Ok(Json(IncidentTimeline { incident, updates }))
}

pub async fn acknowledge_incident(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    let incident = state
        .pipeline
        .incidents()
        .acknowledge(claims.workspace_id, id, claims.sub, Utc::now())
        .await?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
pub struct UpdateIncidentRequest {
    status: IncidentStatus,
    message: String,
}

pub async fn update_incident(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateIncidentRequest>,
) -> ApiResult<Json<Incident>> {
    let incident = state
        .pipeline
        .incidents()
        .update(
            claims.workspace_id,
            id,
            request.status,
            &request.message,
            claims.sub,
            Utc::now(),
        )
        .await?;
    Ok(Json(incident))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveIncidentRequest {
    message: Option<String>,
}

/// The body is optional; an empty one resolves with the default message.
pub async fn resolve_incident(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Json<Incident>> {
    let request: ResolveIncidentRequest = if body.is_empty() {
        ResolveIncidentRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::validation(format!("invalid request body: {e}")))?
    };
    let incident = state
        .pipeline
        .incidents()
        .resolve(
            claims.workspace_id,
            id,
            request.message.as_deref(),
            claims.sub,
            Utc::now(),
        )
        .await?;
    Ok(Json(incident))
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationRequest {
    name: Option<String>,
    channel: ChannelConfig,
}

pub async fn test_notification(
    State(state): State<Arc<AppState>>,
    AuthUser(_claims): AuthUser,
    Json(request): Json<TestNotificationRequest>,
) -> Json<DeliveryReport> {
    let name = request
        .name
        .unwrap_or_else(|| request.channel.kind().to_string());
    Json(state.dispatcher.send_test(&name, &request.channel).await)
}

/// Sends the sample message to every contact and enabled integration of the
/// caller's workspace.
pub async fn test_all_notifications(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
) -> ApiResult<Json<DeliverySummary>> {
    let store = state.pipeline.store();
    let contacts = store.alert_contacts(claims.workspace_id).await?;
    let integrations = store.integrations(claims.workspace_id).await?;

    let mut seen = HashSet::new();
    let recipients: Vec<Recipient> = contacts
        .into_iter()
        .map(|contact| Recipient {
            name: contact.name,
            channel: contact.channel,
            source: RecipientSource::Rule,
        })
        .chain(integrations.into_iter().map(|integration| Recipient {
            name: integration.name,
            channel: integration.channel,
            source: RecipientSource::Integration,
        }))
        .filter(|recipient| seen.insert(recipient.channel.identity()))
        .collect();

    let summary = state
        .dispatcher
        .deliver_all(&recipients, &NotificationMessage::sample(Utc::now()))
        .await;
    info!(
        workspace_id = %claims.workspace_id,
        delivered = summary.delivered,
        failed = summary.failed,
        "test notifications sent"
    );
    Ok(Json(summary))
}
