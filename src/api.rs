//! # HTTP API
//!
//! Read endpoints over the cache, the kit checkout write endpoint and the
//! administrative refresh trigger.
//!
//! ## Endpoints
//!
//! - `GET  /api/v1/http/committee` - all committee rows
//! - `GET  /api/v1/http/announcements` - all announcement rows
//! - `GET  /api/v1/http/atvas/years` - all year rows
//! - `GET  /api/v1/http/atvas/films/:year` - films for one year
//! - `GET  /api/v1/http/kit/assets` - all kit assets
//! - `GET  /api/v1/http/kit/authenticate/:studentnumber` - membership check
//! - `POST /api/v1/http/kit/checkout` - record a kit checkout
//! - `GET  /api/v1/internal/refreshData` - refresh every bound table
//! - `GET  /health` - database liveness

use crate::config::{
    ANNOUNCEMENTS_TABLE, ASSETS_TABLE, COMMITTEE_TABLE, FILMS_TABLE, USERS_TABLE, YEARS_TABLE,
};
use crate::db::{CacheStore, SqlValue};
use crate::error::{CacheError, CacheResult};
use crate::ident;
use crate::inference::{stringify, FieldSet};
use crate::materialize::TableMaterializer;
use crate::query::{select_all, select_filtered};
use crate::refresh::{RefreshEngine, RefreshOutcome};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Users column holding the student number
pub const STUDENT_NUMBER_COLUMN: &str = "Student Number";

/// Users column holding the membership flag
pub const MEMBERSHIP_COLUMN: &str = "Active Member";

/// Local table receiving kit checkouts; never refreshed or cleared
pub const CHECKOUTS_TABLE: &str = "Checkouts";

const CHECKOUT_COLUMNS: &[&str] = &[
    STUDENT_NUMBER_COLUMN,
    "Assets",
    "Start Date",
    "End Date",
    "Received At",
];

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CacheStore>,
    pub engine: Arc<RefreshEngine>,
}

impl AppState {
    pub fn new(store: Arc<CacheStore>, engine: Arc<RefreshEngine>) -> Self {
        Self { store, engine }
    }
}

/// Creates the local checkouts table if it does not exist
pub async fn ensure_checkout_table(materializer: &TableMaterializer) -> CacheResult<()> {
    let fields: FieldSet = CHECKOUT_COLUMNS.iter().map(|c| c.to_string()).collect();
    materializer.ensure_table(CHECKOUTS_TABLE, &fields).await?;
    Ok(())
}

/// Creates the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/committee", get(committee_handler))
        .route("/announcements", get(announcements_handler))
        .route("/atvas/years", get(years_handler))
        .route("/atvas/films/", get(missing_year_handler))
        .route("/atvas/films/:year", get(films_handler))
        .route("/kit/assets", get(assets_handler))
        .route("/kit/authenticate/", get(missing_student_handler))
        .route("/kit/authenticate/:studentnumber", get(authenticate_handler))
        .route("/kit/checkout", post(checkout_handler));

    let internal = Router::new().route("/refreshData", get(refresh_handler));

    Router::new()
        .nest("/api/v1/http", public)
        .nest("/api/v1/internal", internal)
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.query("SELECT 1".to_string(), vec![]).await {
        Ok(_) => Json(json!({
            "status": "healthy",
            "database": "connected"
        })),
        Err(e) => Json(json!({
            "status": "unhealthy",
            "database": "disconnected",
            "error": e.to_string()
        })),
    }
}

// ============================================================================
// Read endpoints
// ============================================================================

async fn table_rows(state: &AppState, table: &str) -> Result<Json<Vec<Value>>, CacheError> {
    let rows = select_all(&state.store, table).await?;
    Ok(Json(rows.into_iter().map(Value::Object).collect()))
}

async fn committee_handler(State(state): State<AppState>) -> impl IntoResponse {
    table_rows(&state, COMMITTEE_TABLE).await
}

async fn announcements_handler(State(state): State<AppState>) -> impl IntoResponse {
    table_rows(&state, ANNOUNCEMENTS_TABLE).await
}

async fn years_handler(State(state): State<AppState>) -> impl IntoResponse {
    table_rows(&state, YEARS_TABLE).await
}

async fn assets_handler(State(state): State<AppState>) -> impl IntoResponse {
    table_rows(&state, ASSETS_TABLE).await
}

async fn missing_year_handler() -> CacheError {
    CacheError::Validation("Year parameter is required".to_string())
}

/// GET /api/v1/http/atvas/films/:year
async fn films_handler(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> Result<Json<Vec<Value>>, CacheError> {
    let year = year.trim();
    if year.is_empty() {
        return Err(CacheError::Validation("Year parameter is required".to_string()));
    }

    let rows = select_filtered(&state.store, FILMS_TABLE, "Year", year).await?;
    Ok(Json(rows.into_iter().map(Value::Object).collect()))
}

// ============================================================================
// Kit membership and checkout
// ============================================================================

/// Flag values that count as an active membership
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "checked"
        ),
        _ => false,
    }
}

/// Looks up the student and checks their membership flag
async fn verify_membership(store: &CacheStore, student_number: &str) -> CacheResult<()> {
    let rows = select_filtered(store, USERS_TABLE, STUDENT_NUMBER_COLUMN, student_number).await?;
    let user = rows.into_iter().next().ok_or_else(|| {
        CacheError::NotFound(format!("Student number {} not found", student_number))
    })?;

    let active = user.get(MEMBERSHIP_COLUMN).map(is_truthy).unwrap_or(false);
    if !active {
        return Err(CacheError::Forbidden(format!(
            "Student number {} does not have an active membership",
            student_number
        )));
    }

    Ok(())
}

#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    pub authenticated: bool,
    pub message: String,
}

async fn missing_student_handler() -> CacheError {
    CacheError::Validation("Student number is required".to_string())
}

/// GET /api/v1/http/kit/authenticate/:studentnumber
async fn authenticate_handler(
    State(state): State<AppState>,
    Path(student_number): Path<String>,
) -> Result<Json<AuthenticateResponse>, CacheError> {
    let student_number = student_number.trim();
    if student_number.is_empty() {
        return Err(CacheError::Validation("Student number is required".to_string()));
    }

    verify_membership(&state.store, student_number).await?;

    Ok(Json(AuthenticateResponse {
        authenticated: true,
        message: format!("Student number {} is an active member", student_number),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub records: Vec<CheckoutRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRecord {
    pub fields: CheckoutFields,
}

/// Values are kept untyped: the form may send numbers or lists
#[derive(Debug, Deserialize)]
pub struct CheckoutFields {
    #[serde(rename = "Student Number", default)]
    pub student_number: Value,
    #[serde(rename = "Assets", default)]
    pub assets: Value,
    #[serde(rename = "Start Date", default)]
    pub start_date: Value,
    #[serde(rename = "End Date", default)]
    pub end_date: Value,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/v1/http/kit/checkout
async fn checkout_handler(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, CacheError> {
    let Json(request) =
        payload.map_err(|e| CacheError::Validation(format!("Invalid checkout body: {}", e)))?;

    if request.records.len() != 1 {
        return Err(CacheError::Validation(format!(
            "Exactly one record is required, got {}",
            request.records.len()
        )));
    }
    let fields = &request.records[0].fields;

    let student_number = stringify(&fields.student_number)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CacheError::Validation("Student Number is required".to_string()))?;

    verify_membership(&state.store, &student_number).await?;

    let assets = stringify(&fields.assets);
    let start_date = stringify(&fields.start_date);
    let end_date = stringify(&fields.end_date);
    info!(
        "Kit checkout: student={} assets={:?} start={:?} end={:?}",
        student_number, assets, start_date, end_date
    );

    let columns: Vec<String> = CHECKOUT_COLUMNS
        .iter()
        .map(|c| ident::quote_column(c))
        .collect::<CacheResult<_>>()?;
    let sql = format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
        ident::quote_table(CHECKOUTS_TABLE)?,
        columns.join(", ")
    );
    state
        .store
        .execute(
            sql,
            vec![
                SqlValue::Text(student_number.clone()),
                SqlValue::from(assets),
                SqlValue::from(start_date),
                SqlValue::from(end_date),
                SqlValue::Text(chrono::Utc::now().to_rfc3339()),
            ],
        )
        .await?;

    Ok(Json(CheckoutResponse {
        success: true,
        message: format!("Checkout recorded for student number {}", student_number),
    }))
}

// ============================================================================
// Internal
// ============================================================================

/// GET /api/v1/internal/refreshData - always 200; failures are in the logs
async fn refresh_handler(State(state): State<AppState>) -> impl IntoResponse {
    let reports = state.engine.refresh_all().await;
    let refreshed = reports
        .iter()
        .filter(|r| matches!(r.outcome, RefreshOutcome::Refreshed { .. }))
        .count();

    let body = if refreshed == reports.len() {
        "All tables updated successfully\n".to_string()
    } else {
        format!(
            "Refresh finished: {} of {} tables updated, see logs for details\n",
            refreshed,
            reports.len()
        )
    };

    (StatusCode::OK, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Provider, SchemaPolicy, SyncConfig, TableBinding};
    use crate::inference::Record;
    use crate::remote::RemoteSource;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use tower::util::ServiceExt;

    struct StaticSource {
        tables: HashMap<String, Vec<Record>>,
    }

    #[async_trait]
    impl RemoteSource for StaticSource {
        async fn fetch(&self, remote_id: &str, _credential: &str) -> CacheResult<Vec<Record>> {
            self.tables
                .get(remote_id)
                .cloned()
                .ok_or_else(|| CacheError::Network(format!("{} unreachable", remote_id)))
        }
    }

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    async fn create_test_app() -> (Router, Arc<CacheStore>) {
        let mut tables = HashMap::new();
        tables.insert(
            "mcommittee".to_string(),
            records(vec![json!({"Id": 1, "Name": "Ada", "Role": "Chair"})]),
        );
        tables.insert(
            "mfilms".to_string(),
            records(vec![
                json!({"Title": "Heat", "Year": "2020"}),
                json!({"Title": "Alien", "Year": 2021}),
                json!({"Title": "Up", "Year": 2020}),
            ]),
        );
        tables.insert(
            "musers".to_string(),
            records(vec![
                json!({"Student Number": "1001", "Active Member": true}),
                json!({"Student Number": "1002", "Active Member": false}),
                json!({"Student Number": "1003", "Active Member": null}),
            ]),
        );

        build_app(tables).await
    }

    async fn build_app(tables: HashMap<String, Vec<Record>>) -> (Router, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = Arc::new(TableMaterializer::new(store.clone()));

        let config = SyncConfig {
            provider: Provider::Nocodb,
            remote_url: "http://upstream".to_string(),
            credential: Some("token".to_string()),
            bindings: vec![
                TableBinding::new(COMMITTEE_TABLE, "mcommittee"),
                TableBinding::new(FILMS_TABLE, "mfilms"),
                TableBinding::new(USERS_TABLE, "musers"),
                TableBinding::new(ASSETS_TABLE, "massets"),
            ],
            schema_policy: SchemaPolicy::Fixed,
        };
        let engine = Arc::new(RefreshEngine::new(
            store.clone(),
            materializer.clone(),
            Arc::new(StaticSource { tables }),
            &config,
        ));
        engine.initialize().await.unwrap();
        ensure_checkout_table(&materializer).await.unwrap();

        (create_router(AppState::new(store.clone(), engine)), store)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn checkout(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/http/kit/checkout")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn checkout_record(student: &str) -> Value {
        json!({"fields": {
            "Student Number": student,
            "Assets": ["Camera", "Tripod"],
            "Start Date": "2024-03-01",
            "End Date": "2024-03-03"
        }})
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app().await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
    }

    #[tokio::test]
    async fn test_committee_rows() {
        let (app, _) = create_test_app().await;
        let (status, body) = send(&app, get("/api/v1/http/committee")).await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Name"], json!("Ada"));
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_films_filtered_by_year() {
        let (app, _) = create_test_app().await;
        let (status, body) = send(&app, get("/api/v1/http/atvas/films/2020")).await;

        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["Year"] == json!("2020")));

        let (status, _) = send(&app, get("/api/v1/http/atvas/films/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unloaded_table_is_server_error() {
        let (app, _) = create_test_app().await;
        let (status, body) = send(&app, get("/api/v1/http/kit/assets")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], json!("STORAGE_ERROR"));
    }

    #[tokio::test]
    async fn test_lookup_column_missing_is_server_error() {
        let mut tables = HashMap::new();
        tables.insert("musers".to_string(), Vec::new());
        tables.insert("mfilms".to_string(), records(vec![json!({"Title": "Heat"})]));
        let (app, _) = build_app(tables).await;

        let (status, body) = send(&app, get("/api/v1/http/kit/authenticate/1001")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], json!("STORAGE_ERROR"));

        let (status, _) = send(&app, get("/api/v1/http/atvas/films/2020")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (app, _) = create_test_app().await;

        let (status, body) = send(&app, get("/api/v1/http/kit/authenticate/1001")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], json!(true));

        let (status, _) = send(&app, get("/api/v1/http/kit/authenticate/1002")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, get("/api/v1/http/kit/authenticate/1003")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, get("/api/v1/http/kit/authenticate/9999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get("/api/v1/http/kit/authenticate/")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_record_count() {
        let (app, _) = create_test_app().await;

        let two = json!({"records": [checkout_record("1001"), checkout_record("1001")]});
        let (status, _) = send(&app, checkout(two)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, checkout(json!({"records": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, checkout(json!({"nonsense": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkout_membership() {
        let (app, store) = create_test_app().await;

        let (status, _) = send(&app, checkout(json!({"records": [checkout_record("9999")]}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, checkout(json!({"records": [checkout_record("1002")]}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, checkout(json!({"records": [checkout_record("1001")]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));

        let saved = select_all(&store, CHECKOUTS_TABLE).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0][STUDENT_NUMBER_COLUMN], json!("1001"));
        assert_eq!(saved[0]["Assets"], json!(r#"["Camera","Tripod"]"#));
    }

    #[tokio::test]
    async fn test_refresh_endpoint_always_ok() {
        let (app, _) = create_test_app().await;
        let (status, body) = send(&app, get("/api/v1/internal/refreshData")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("3 of 4 tables updated"));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let (app, _) = create_test_app().await;
        let request = Request::builder()
            .uri("/api/v1/http/committee")
            .header("origin", "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
