//! REST API router, shared state and error mapping.
//!
//! Endpoints mirror the resource names of the editorial frontend:
//! - `/api/<resource>/` and `/api/<resource>/:id/` for every record type
//! - `/api/dboe-query/?q=...` and `/api/dboe-query-by-id/:id`
//! - `/stats/<ranking>/`, `/project-info/` and `/` (API index)

mod annotations;
mod belege;
mod siglen;

use crate::config::Settings;
use crate::error::DboeError;
use crate::search::SearchClient;
use crate::{Dboe, Result};
use axum::{
    Json, Router,
    extract::{FromRequest, Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dboe: Dboe,
    pub settings: Arc<Settings>,
    /// Index the Belege are written to after a save.
    pub index: Option<SearchClient>,
    /// External index behind the dboe-query routes.
    pub query: Option<SearchClient>,
}

impl AppState {
    pub fn new(dboe: Dboe, settings: Settings) -> Self {
        AppState {
            index: settings.index_client(),
            query: settings.query_client(),
            settings: Arc::new(settings),
            dboe,
        }
    }
}

/// Resources listed by the API index, in route order.
pub const RESOURCES: [&str; 19] = [
    "users",
    "categories",
    "tags",
    "documents",
    "collections",
    "annotations",
    "lemmas",
    "author_artikel",
    "article_edits",
    "belege-elastic-search",
    "kontexte",
    "lautungen",
    "lehnworte",
    "bedeutungen",
    "anmerkungen-lautung",
    "facsimiles",
    "facsimiles-belege",
    "siglen",
    "belege-siglen",
];

// --- Errors ---

/// A `DboeError` rendered as `{"detail": ...}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub DboeError);

impl From<DboeError> for ApiError {
    fn from(e: DboeError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(DboeError::InvalidArgument(rejection.body_text()))
    }
}

/// JSON request body whose rejections render as `ApiError`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Payload<T>(pub T);

pub type ApiResult<T = Json<Value>> = std::result::Result<T, ApiError>;

pub fn status_for(error: &DboeError) -> StatusCode {
    match error {
        DboeError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            }
        }
        DboeError::NotFound { .. } => StatusCode::NOT_FOUND,
        DboeError::InvalidArgument(_)
        | DboeError::Xml(_)
        | DboeError::XmlParse(_)
        | DboeError::XmlAttr(_)
        | DboeError::Json(_) => StatusCode::BAD_REQUEST,
        DboeError::Conflict(_) => StatusCode::CONFLICT,
        DboeError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        DboeError::SearchNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

// --- Handler helpers ---

/// Runs a store call off the async workers.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&Dboe) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let dboe = state.dboe.clone();
    tokio::task::spawn_blocking(move || f(&dboe)).await?
}

/// Runs a list query and wraps the rows in the `{"count", "results"}`
/// envelope.
pub(crate) async fn listing<T, F>(state: &AppState, resource: &'static str, f: F) -> ApiResult
where
    F: FnOnce(&Dboe) -> Result<Vec<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let started = Instant::now();
    let rows = blocking(state, f).await?;
    if state.settings.debug {
        debug!(
            "{}: {} rows in {:?}",
            resource,
            rows.len(),
            started.elapsed()
        );
    }
    Ok(Json(json!({ "count": rows.len(), "results": rows })))
}

pub(crate) fn detail_url(resource: &str, id: impl std::fmt::Display) -> String {
    format!("/api/{}/{}/", resource, id)
}

/// Serialises `row` and adds its `url` (and `id`, when given).
pub(crate) fn with_url<T: Serialize>(
    row: &T,
    resource: &str,
    key: impl std::fmt::Display,
    id: Option<&str>,
) -> Result<Value> {
    let mut value = serde_json::to_value(row)?;
    if let Value::Object(map) = &mut value {
        map.insert("url".into(), Value::String(detail_url(resource, &key)));
        if let Some(id) = id {
            map.insert("id".into(), Value::String(id.to_string()));
        }
    }
    Ok(value)
}

/// Keeps only `fields` of a serialised row.
pub(crate) fn project(value: Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(mut map) => {
            let kept: Map<String, Value> = fields
                .iter()
                .filter_map(|f| map.remove(*f).map(|v| (f.to_string(), v)))
                .collect();
            Value::Object(kept)
        }
        other => other,
    }
}

/// Handler for write methods on read-only resources.
pub(crate) async fn method_not_allowed() -> ApiError {
    ApiError(DboeError::MethodNotAllowed("POST".into()))
}

// --- Root handlers ---

async fn api_index() -> Json<Value> {
    let roots: Map<String, Value> = RESOURCES
        .iter()
        .map(|r| (r.to_string(), Value::String(format!("/api/{}/", r))))
        .collect();
    Json(Value::Object(roots))
}

async fn project_info() -> Json<Value> {
    Json(json!({
        "title": "DBÖ Annotation",
        "project_name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Backend of the Datenbank der bairischen Mundarten in Österreich",
        "base_tech": "axum",
    }))
}

async fn stats(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let ranking = blocking(&state, move |dboe| dboe.ranking_by_path(&name)).await?;
    Ok(Json(serde_json::to_value(ranking).map_err(DboeError::from)?))
}

#[derive(Debug, Deserialize)]
struct DboeQuery {
    q: Option<String>,
}

async fn dboe_query(State(state): State<AppState>, Query(query): Query<DboeQuery>) -> ApiResult {
    let q = query.q.filter(|q| !q.is_empty());
    let Some(q) = q else {
        return Ok(Json(json!({ "results": null })));
    };
    let client = state.query.as_ref().ok_or(DboeError::SearchNotConfigured)?;
    let results = client.search_all(&q).await?;
    Ok(Json(json!({ "results": results })))
}

async fn dboe_query_by_id(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let client = state.query.as_ref().ok_or(DboeError::SearchNotConfigured)?;
    let source = client.by_id(&id).await?;
    Ok(Json(json!({ "results": source })))
}

/// Builds the complete router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(annotations::routes())
        .merge(belege::routes())
        .merge(siglen::routes())
        .route("/dboe-query/", get(dboe_query))
        .route("/dboe-query-by-id/:id", get(dboe_query_by_id));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(api_index))
        .route("/project-info/", get(project_info))
        .route("/stats/:name/", get(stats))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}

/// Serves the API until the process is stopped.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.settings.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    log::info!("Listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&DboeError::not_found("Beleg", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DboeError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DboeError::SearchNotConfigured),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            None,
        );
        assert_eq!(status_for(&DboeError::from(unique)), StatusCode::CONFLICT);
        let foreign_key = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            None,
        );
        assert_eq!(status_for(&DboeError::from(foreign_key)), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&DboeError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_with_url_and_project() {
        let tag = crate::Tag {
            id: 3,
            name: "rot".into(),
            ..Default::default()
        };
        let value = with_url(&tag, "tags", tag.id, None).unwrap();
        assert_eq!(value["url"], "/api/tags/3/");
        let slim = project(value, &["id", "url", "missing"]);
        assert_eq!(slim, json!({ "id": 3, "url": "/api/tags/3/" }));
    }
}
