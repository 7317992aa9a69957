use axum::{
    Router,
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{Json, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uptime_core::{
    Error, auth::AuthService, auth::Claims, events::EventPublisher, notify::Dispatcher,
    pipeline::CheckPipeline,
};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CheckPipeline>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: Arc<dyn EventPublisher>,
    pub auth: AuthService,
}

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            other => {
                error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Caller identity from a `Bearer` JWT.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::auth("missing authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::auth("expected a bearer token"))?;
        Ok(AuthUser(state.auth.verify(token.trim())?))
    }
}

pub async fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/push/{token}",
            get(handlers::push_heartbeat).post(handlers::push_heartbeat),
        )
        .route("/api/push/{token}/result", post(handlers::push_result))
        .route("/api/monitors/{id}/check", post(handlers::check_now))
        .route("/api/monitors/{id}/pause", post(handlers::pause_monitor))
        .route("/api/monitors/{id}/resume", post(handlers::resume_monitor))
        .route("/api/incidents/{id}", get(handlers::get_incident))
        .route(
            "/api/incidents/{id}/acknowledge",
            post(handlers::acknowledge_incident),
        )
        .route("/api/incidents/{id}/updates", post(handlers::update_incident))
        .route("/api/incidents/{id}/resolve", post(handlers::resolve_incident))
        .route("/api/notifications/test", post(handlers::test_notification))
        .route(
            "/api/notifications/test-all",
            post(handlers::test_all_notifications),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;
    use uptime_core::events::MemoryPublisher;
    use uptime_core::incidents::IncidentOutcome;
    use uptime_core::models::{
        CheckResult, IncidentStatus, Monitor, MonitorStatus, MonitorType, PUSH_REGION,
    };
    use uptime_core::queue::{Job, MemoryQueue, QueuePolicy};
    use uptime_core::store::{MemoryStore, Store};
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        events: Arc<MemoryPublisher>,
        state: Arc<AppState>,
        workspace_id: Uuid,
        token: String,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new(QueuePolicy::default()));
        let events = Arc::new(MemoryPublisher::new());
        let pipeline = Arc::new(CheckPipeline::new(
            store.clone(),
            queue.clone(),
            events.clone(),
            24,
        ));
        let auth = AuthService::new("test-secret", 3600);
        let workspace_id = Uuid::new_v4();
        let token = auth.issue(Uuid::new_v4(), workspace_id).unwrap();
        let state = Arc::new(AppState {
            pipeline,
            dispatcher: Arc::new(Dispatcher::new(None, None).unwrap()),
            events: events.clone(),
            auth,
        });
        Harness {
            store,
            queue,
            events,
            state,
            workspace_id,
            token,
        }
    }

    impl Harness {
        fn monitor(&self, monitor_type: MonitorType) -> Monitor {
            let monitor = Monitor::new(self.workspace_id, "api", monitor_type, "https://example.com");
            self.store.insert_monitor(monitor.clone()).unwrap();
            monitor
        }

        async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {}", self.token));
            let body = match body {
                Some(value) => {
                    request = request.header("content-type", "application/json");
                    Body::from(value.to_string())
                }
                None => Body::empty(),
            };
            let app = create_app(self.state.clone()).await;
            let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn open_incident(&self, monitor: &Monitor) -> Uuid {
            let recorded = self
                .state
                .pipeline
                .record(monitor, &CheckResult::down("connection refused", 10), Utc::now())
                .await
                .unwrap();
            match recorded.incident {
                Some(IncidentOutcome::Opened(incident)) => incident.id,
                other => panic!("expected an opened incident, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let h = harness();
        let app = create_app(h.state.clone()).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_tokens() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Http);
        let app = create_app(h.state.clone()).await;
        let response = app
            .oneshot(
                Request::post(format!("/api/monitors/{}/check", monitor.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn check_now_enqueues_a_forced_check() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Http);

        let (status, body) = h
            .call("POST", &format!("/api/monitors/{}/check", monitor.id), None)
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["jobId"].is_string());
        assert_eq!(
            h.queue.pending(),
            vec![Job::CheckMonitor {
                monitor_id: monitor.id,
                forced: true
            }]
        );
    }

    #[tokio::test]
    async fn monitors_of_other_workspaces_are_not_found() {
        let h = harness();
        let foreign = Monitor::new(Uuid::new_v4(), "theirs", MonitorType::Http, "https://x.io");
        h.store.insert_monitor(foreign.clone()).unwrap();

        let (status, _) = h
            .call("POST", &format!("/api/monitors/{}/pause", foreign.id), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pause_then_resume() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Http);

        let (status, _) = h
            .call("POST", &format!("/api/monitors/{}/pause", monitor.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let paused = h.store.get_monitor(monitor.id).await.unwrap().unwrap();
        assert!(!paused.is_active);
        assert_eq!(paused.status, MonitorStatus::Paused);

        let (status, _) = h
            .call("POST", &format!("/api/monitors/{}/resume", monitor.id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let resumed = h.store.get_monitor(monitor.id).await.unwrap().unwrap();
        assert!(resumed.is_active);
        assert_eq!(resumed.status, MonitorStatus::Up);
        assert_eq!(h.queue.pending().len(), 1);
        assert_eq!(
            h.events.names(),
            vec!["monitor.status_changed", "monitor.status_changed"]
        );
    }

    #[tokio::test]
    async fn heartbeat_push_records_an_up_check() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Heartbeat);
        let token = monitor.push_token.clone().unwrap();

        let app = create_app(h.state.clone()).await;
        let response = app
            .oneshot(
                Request::get(format!("/api/push/{token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let checks = h.store.checks(monitor.id).unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].is_up());
        assert_eq!(checks[0].region, PUSH_REGION);
        assert!(h.store.last_push_at(monitor.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_push_token_is_not_found() {
        let h = harness();
        let (status, _) = h.call("POST", "/api/push/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inbound_result_drives_the_status_change_path() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Heartbeat);
        let token = monitor.push_token.clone().unwrap();

        let (status, body) = h
            .call(
                "POST",
                &format!("/api/push/{token}/result"),
                Some(json!({ "status": "down", "responseTime": 1200, "error": "job crashed" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "down");
        assert_eq!(body["incidentOpened"], true);

        let checks = h.store.checks(monitor.id).unwrap();
        assert_eq!(checks[0].region, "webhook");
        assert_eq!(checks[0].error.as_deref(), Some("job crashed"));
        assert!(h.store.open_incident(monitor.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inbound_result_rejects_unknown_status() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Heartbeat);
        let token = monitor.push_token.clone().unwrap();
        let (status, _) = h
            .call(
                "POST",
                &format!("/api/push/{token}/result"),
                Some(json!({ "status": "sideways" })),
            )
            .await;
        assert!(status.is_client_error());
        assert!(h.store.checks(monitor.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn inbound_result_rejects_absurd_response_times() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Heartbeat);
        let token = monitor.push_token.clone().unwrap();
        let (status, _) = h
            .call(
                "POST",
                &format!("/api/push/{token}/result"),
                Some(json!({ "status": "up", "responseTime": u64::MAX })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.store.checks(monitor.id).unwrap().is_empty());

        let (status, _) = h
            .call(
                "POST",
                &format!("/api/push/{token}/result"),
                Some(json!({ "status": "up", "responseTime": 250 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let stored = h.store.get_monitor(monitor.id).await.unwrap().unwrap();
        assert_eq!(stored.avg_response_time, 250);
    }

    #[tokio::test]
    async fn incident_lifecycle_over_http() {
        let h = harness();
        let monitor = h.monitor(MonitorType::Http);
        let incident_id = h.open_incident(&monitor).await;
        let base = format!("/api/incidents/{incident_id}");

        let (status, body) = h.call("POST", &format!("{base}/acknowledge"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "identified");

        let (status, _) = h.call("POST", &format!("{base}/acknowledge"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h
            .call(
                "POST",
                &format!("{base}/updates"),
                Some(json!({ "status": "monitoring", "message": "fix deployed" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "monitoring");

        let (status, _) = h
            .call(
                "POST",
                &format!("{base}/updates"),
                Some(json!({ "status": "monitoring", "message": "  " })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h.call("POST", &format!("{base}/resolve"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "resolved");

        let (status, body) = h.call("GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["incident"]["status"], "resolved");
        let messages: Vec<&str> = body["updates"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["message"].as_str().unwrap())
            .collect();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1], "Incident acknowledged");
        assert_eq!(messages[2], "fix deployed");
        assert_eq!(messages[3], "Incident resolved manually");

        let stored = h.store.get_incident(incident_id).await.unwrap().unwrap();
        assert_eq!(stored.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn test_notification_reports_synchronously() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/slack")
            .with_status(200)
            .create_async()
            .await;
        let h = harness();

        let (status, body) = h
            .call(
                "POST",
                "/api/notifications/test",
                Some(json!({
                    "name": "ops",
                    "channel": { "type": "slack", "webhook_url": format!("{}/slack", server.url()) }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], true);
        assert_eq!(body["channel"], "slack");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_all_with_no_channels_is_an_empty_summary() {
        let h = harness();
        let (status, body) = h.call("POST", "/api/notifications/test-all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 0);
        assert_eq!(body["failed"], 0);
    }
}
