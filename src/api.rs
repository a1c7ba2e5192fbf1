// REST boundary - axum router over the approval workflow
//
// Identity arrives from the upstream auth layer as two trusted headers,
// `x-actor-id` and `x-actor-role`. Every response is an `ApiResponse`
// envelope.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::enrichment::{enrich_items, load_reimbursement_detail};
use crate::error::WorkflowError;
use crate::models::{Actor, Decision, Role, Stage};
use crate::orchestrator::{ApprovalWorkflow, DecisionRequest};
use crate::payment::PaymentRequest;
use crate::queue::{build_queue_query, fetch_queue, QueueFilter, QueueRequest};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub workflow: ApprovalWorkflow,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            workflow: ApprovalWorkflow::new(db),
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    fn ok_with_message(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.to_string()),
        }
    }
}

/// Error side of the envelope.
struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError(err)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError(WorkflowError::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            message: Some(self.0.public_message()),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, WorkflowError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| WorkflowError::InvalidInput(format!("Missing {} header", name)))
    };

    let id = header(ACTOR_ID_HEADER)?
        .parse::<i64>()
        .map_err(|_| WorkflowError::InvalidInput(format!("Invalid {} header", ACTOR_ID_HEADER)))?;
    let role = header(ACTOR_ROLE_HEADER)?.parse::<Role>()?;

    Ok(Actor::new(id, role))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

#[derive(Debug, Default, Deserialize)]
struct QueueParams {
    stage: Option<String>,
}

/// GET /api/queue/:status - Work queue for the calling actor
async fn get_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(status): Path<String>,
    Query(params): Query<QueueParams>,
) -> ApiResult<Vec<crate::enrichment::Enriched<crate::queue::QueueItem>>> {
    let actor = actor_from_headers(&headers)?;
    let filter = status.parse::<QueueFilter>()?;
    let stage = match params.stage.as_deref() {
        Some(raw) if actor.role == Role::SuperAdmin => Some(raw.parse::<Stage>()?),
        _ => None,
    };

    let request = QueueRequest::new(actor.role, Some(actor.id), filter).with_stage(stage);
    let predicate = build_queue_query(&request)?;

    let conn = state.workflow.database().checkout()?;
    let rows = fetch_queue(&conn, &predicate)?;
    let enriched = enrich_items(&conn, rows, stage);

    Ok(Json(ApiResponse::ok(enriched)))
}

/// GET /api/queue/pending - shorthand kept for clients of the pending view
async fn get_pending_queue(
    state: State<AppState>,
    headers: HeaderMap,
    params: Query<QueueParams>,
) -> ApiResult<Vec<crate::enrichment::Enriched<crate::queue::QueueItem>>> {
    get_queue(state, headers, Path("pending".to_string()), params).await
}

async fn decide(
    state: &AppState,
    headers: &HeaderMap,
    decision: Decision,
    request: DecisionRequest,
) -> ApiResult<crate::orchestrator::TransitionOutcome> {
    let actor = actor_from_headers(headers)?;
    let outcome = state.workflow.decide(&actor, decision, &request)?;
    let message = match decision {
        Decision::Approved => "Item approved",
        Decision::Rejected => "Item rejected",
    };
    Ok(Json(ApiResponse::ok_with_message(outcome, message)))
}

/// POST /api/items/approve
async fn approve_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<crate::orchestrator::TransitionOutcome> {
    decide(&state, &headers, Decision::Approved, request).await
}

/// POST /api/items/reject
async fn reject_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<crate::orchestrator::TransitionOutcome> {
    decide(&state, &headers, Decision::Rejected, request).await
}

/// POST /api/items/pay - Record settlement of a finance-approved item
async fn pay_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<crate::payment::PaymentOutcome> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state.workflow.mark_paid(&actor, &request)?;
    Ok(Json(ApiResponse::ok_with_message(outcome, "Item marked as paid")))
}

/// GET /api/reimbursements/:id - Reimbursement with enriched items
async fn get_reimbursement_detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<crate::enrichment::ReimbursementDetail> {
    let actor = actor_from_headers(&headers)?;

    let conn = state.workflow.database().checkout()?;
    let detail = load_reimbursement_detail(&conn, id)?
        .filter(|d| actor.role != Role::Employee || d.reimbursement.employee_id == actor.id)
        .ok_or_else(|| WorkflowError::NotEligible("Reimbursement not found"))?;

    Ok(Json(ApiResponse::ok(detail)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/queue/pending", get(get_pending_queue))
        .route("/queue/:status", get(get_queue))
        .route("/items/approve", post(approve_item))
        .route("/items/reject", post(reject_item))
        .route("/items/pay", post(pay_item))
        .route("/reimbursements/:id", get(get_reimbursement_detail))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{org, Org};
    use crate::db::{insert_reimbursement, setup_database, NewItem};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rusqlite::Connection;
    use tower::ServiceExt;

    fn app() -> (Router, Org, i64, Vec<i64>) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let org = org(&conn);
        let (rid, ids) = insert_reimbursement(
            &conn,
            org.employee,
            &[NewItem::new("travel", "Flight", 500.0)],
        )
        .unwrap();
        let state = AppState::new(Database::from_connection(conn));
        (router(state), org, rid, ids)
    }

    fn post_json(uri: &str, actor: (i64, &str), body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(ACTOR_ID_HEADER, actor.0.to_string())
            .header(ACTOR_ROLE_HEADER, actor.1)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_as(uri: &str, actor: (i64, &str)) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(ACTOR_ID_HEADER, actor.0.to_string())
            .header(ACTOR_ROLE_HEADER, actor.1)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _, _) = app();
        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_full_flow_over_http() {
        let (app, org, _, ids) = app();
        let item = ids[0];

        let (status, body) = send(
            &app,
            get_as("/api/queue/pending", (org.manager, "manager")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], item);

        let steps = [(org.manager, "manager"), (org.hr, "hr"), (org.finance, "finance")];
        for actor in steps {
            let (status, body) = send(
                &app,
                post_json("/api/items/approve", actor, serde_json::json!({"itemId": item, "comments": "ok"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            assert_eq!(body["success"], true);
        }

        let (status, body) = send(
            &app,
            post_json(
                "/api/items/pay",
                (org.finance, "finance"),
                serde_json::json!({"itemId": item, "paidAmount": 500, "tdsAmount": 50, "finalAmount": 450}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"]["reimbursement_status"], "paid");

        let (status, body) = send(
            &app,
            get_as("/api/queue/approved?stage=manager", (org.admin, "superadmin")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["status"], "paid");
        let history = body["data"][0]["approval_history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["stage"], "manager");
    }

    #[tokio::test]
    async fn test_status_codes() {
        let (app, org, _, ids) = app();

        // missing itemId
        let (status, body) = send(
            &app,
            post_json("/api/items/approve", (org.manager, "manager"), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        // employees cannot approve
        let (status, _) = send(
            &app,
            post_json("/api/items/approve", (org.employee, "employee"), serde_json::json!({"itemId": ids[0]})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // HR cannot act before the manager
        let (status, body) = send(
            &app,
            post_json("/api/items/approve", (org.hr, "hr"), serde_json::json!({"itemId": ids[0]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Item not found or not eligible");

        // payment before finance approval
        let (status, _) = send(
            &app,
            post_json(
                "/api/items/pay",
                (org.finance, "finance"),
                serde_json::json!({"itemId": ids[0], "finalAmount": 10}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // unknown queue status
        let (status, _) = send(&app, get_as("/api/queue/archived", (org.hr, "hr"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_actor_headers() {
        let (app, _, _, _) = app();
        let request = Request::builder()
            .uri("/api/queue/pending")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains(ACTOR_ID_HEADER));
    }

    #[tokio::test]
    async fn test_employee_cannot_read_other_reimbursement() {
        let (app, org, rid, _) = app();

        let (status, _) = send(
            &app,
            get_as(&format!("/api/reimbursements/{}", rid), (org.other_employee, "employee")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            get_as(&format!("/api/reimbursements/{}", rid), (org.employee, "employee")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    }
}
