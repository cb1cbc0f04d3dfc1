use crate::accounts::AccountDirectory;
use crate::delivery::DeliveryEngine;
use crate::error::WebhookError;
use crate::manager::WebhookManager;
use crate::notify::Notifier;
use crate::payload::EvaluationResult;
use crate::rate_limit::{self, RateLimiter};
use crate::store::{WebhookStore, MAX_DELIVERIES_PER_OWNER};
use crate::types::{DeliveryRecord, OwnerId, WebhookConfiguration};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Header carrying the caller credential.
pub const CREDENTIAL_HEADER: &str = "x-api-key";

/// Everything the handlers share. Built once per process.
pub struct AppState {
    pub store: Arc<WebhookStore>,
    pub manager: WebhookManager,
    pub notifier: Notifier,
    pub limiter: RateLimiter,
    pub accounts: Arc<dyn AccountDirectory>,
}

impl AppState {
    pub fn new(
        store: Arc<WebhookStore>,
        engine: DeliveryEngine,
        limiter: RateLimiter,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        let manager = WebhookManager::new(store.clone());
        let notifier = Notifier::new(manager.clone(), Arc::new(engine));
        Self {
            store,
            manager,
            notifier,
            limiter,
            accounts,
        }
    }
}

type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route(
            "/webhooks",
            post(register_webhook)
                .get(get_webhook)
                .delete(delete_webhook),
        )
        .route("/webhooks/history", get(webhook_history))
        .route("/evaluations", post(report_evaluation))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// Serve the router on an already-bound listener until the process stops.
pub async fn serve(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "webhook notifier listening");
    }
    axum::serve(listener, router(state)).await
}

// ─── Credential + quota gate ────────────────────────────────────────────────

async fn authenticate(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credential = match request
        .headers()
        .get(CREDENTIAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(c) => c.to_string(),
        None => {
            return WebhookError::Unauthorized("missing X-API-Key header".into()).into_response()
        }
    };

    let Some(owner) = state.accounts.resolve(&credential) else {
        return WebhookError::Unauthorized("unknown credential".into()).into_response();
    };

    let info = match state.limiter.check(&credential) {
        Ok(info) => info,
        Err(e) => {
            tracing::debug!(owner = %owner, "request rejected by rate limit");
            return rate_limit::rejection(e);
        }
    };

    request.extensions_mut().insert(owner);
    let mut response = next.run(request).await;
    rate_limit::apply_headers(response.headers_mut(), &info);
    response
}

// ─── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Public view of a configuration. The secret itself is never exposed.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct WebhookView {
    pub configured: bool,
    pub url: Option<String>,
    pub has_secret: bool,
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WebhookView {
    fn none() -> Self {
        Self {
            configured: false,
            url: None,
            has_secret: false,
            active: false,
            created_at: None,
            updated_at: None,
        }
    }
}

impl From<&WebhookConfiguration> for WebhookView {
    fn from(config: &WebhookConfiguration) -> Self {
        Self {
            configured: true,
            url: Some(config.url.clone()),
            has_secret: config.secret.is_some(),
            active: config.active,
            created_at: Some(config.created_at),
            updated_at: Some(config.updated_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub deliveries: Vec<DeliveryRecord>,
    pub count: usize,
    pub max_records: usize,
}

#[derive(Debug, Deserialize)]
pub struct EvaluationReport {
    pub results: Vec<EvaluationResult>,
    #[serde(default)]
    pub evaluated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub evaluated_at: DateTime<Utc>,
    pub total: usize,
    pub triggered: usize,
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register_webhook(
    State(state): State<SharedState>,
    Extension(owner): Extension<OwnerId>,
    Json(body): Json<RegisterWebhookRequest>,
) -> Result<(StatusCode, Json<WebhookView>), WebhookError> {
    let (config, is_new) = state
        .manager
        .register(&owner, &body.url, body.secret)
        .await?;
    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(WebhookView::from(&config))))
}

async fn get_webhook(
    State(state): State<SharedState>,
    Extension(owner): Extension<OwnerId>,
) -> Json<WebhookView> {
    let view = match state.manager.get(&owner).await {
        Some(config) => WebhookView::from(&config),
        None => WebhookView::none(),
    };
    Json(view)
}

async fn delete_webhook(
    State(state): State<SharedState>,
    Extension(owner): Extension<OwnerId>,
) -> Result<Json<serde_json::Value>, WebhookError> {
    state.manager.remove(&owner).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn webhook_history(
    State(state): State<SharedState>,
    Extension(owner): Extension<OwnerId>,
) -> Json<HistoryResponse> {
    let deliveries = state.store.deliveries(&owner).await;
    Json(HistoryResponse {
        count: deliveries.len(),
        deliveries,
        max_records: MAX_DELIVERIES_PER_OWNER,
    })
}

/// Integration point for evaluators: the response never depends on how the
/// webhook delivery went.
async fn report_evaluation(
    State(state): State<SharedState>,
    Extension(owner): Extension<OwnerId>,
    Json(report): Json<EvaluationReport>,
) -> Json<EvaluationResponse> {
    let evaluated_at = report.evaluated_at.unwrap_or_else(Utc::now);
    let triggered = report.results.iter().filter(|r| r.triggered).count();

    if triggered > 0 {
        state
            .notifier
            .notify(&owner, &report.results, evaluated_at)
            .await;
    }

    Json(EvaluationResponse {
        evaluated_at,
        total: report.results.len(),
        triggered,
    })
}
