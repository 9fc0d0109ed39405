use crate::config::ApiConfig;
use crate::error::RegistryError;
use crate::metadata::MetadataRecord;
use crate::presigned_urls::{PresignedUrl, UrlService};
use crate::registry::Registry;
use crate::validation::ValidationError;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub urls: UrlService,
}

/// Presigned URL response
#[derive(Debug, Serialize)]
pub struct PresignedUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl From<PresignedUrl> for PresignedUrlResponse {
    fn from(url: PresignedUrl) -> Self {
        Self {
            url: url.url,
            expires_at: url.expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct MetadataListResponse {
    pub metadata: Vec<MetadataRecord>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ValidationError>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            RegistryError::ReferencedObjectMissing { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RegistryError::DuplicateRecord { .. } => StatusCode::CONFLICT,
            RegistryError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Dependency causes are logged where they happen, never returned
        let error = match &err {
            RegistryError::Dependency(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let code = err.code().to_string();
        let details = match err {
            RegistryError::ValidationFailed(violations) => violations,
            _ => Vec::new(),
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code,
                details,
            }),
        )
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: rejection.body_text(),
            code: "INVALID_BODY".to_string(),
            details: Vec::new(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/v1/audio",
            get(download_url_by_query).post(upload_url),
        )
        .route("/api/v1/audio/:filename", get(download_url))
        .route("/api/v1/metadata", get(list_metadata).post(create_metadata))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "audio-registry"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "record_store": "connected"
            })),
        ),
        Err(e) => {
            error!(error = ?e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "record_store": "disconnected"
                })),
            )
        }
    }
}

/// Presigned upload URL carrying the submitted metadata
#[instrument(skip(state, body))]
async fn upload_url(
    State(state): State<AppState>,
    body: Result<Json<MetadataRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<PresignedUrlResponse>), ApiError> {
    let Json(submission) = body.map_err(invalid_body)?;

    let url = state.urls.upload_url(&submission).await?;

    Ok((StatusCode::CREATED, Json(url.into())))
}

#[instrument(skip(state))]
async fn download_url(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<PresignedUrlResponse>, ApiError> {
    Ok(Json(state.urls.download_url(&filename).await?.into()))
}

#[instrument(skip(state))]
async fn download_url_by_query(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Json<PresignedUrlResponse>, ApiError> {
    Ok(Json(state.urls.download_url(&query.filename).await?.into()))
}

/// Register metadata for an uploaded object
#[instrument(skip(state, body))]
async fn create_metadata(
    State(state): State<AppState>,
    body: Result<Json<MetadataRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let Json(submission) = body.map_err(invalid_body)?;

    state.registry.create_from_submission(&submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "successfully stored" })),
    ))
}

#[instrument(skip(state))]
async fn list_metadata(
    State(state): State<AppState>,
) -> Result<Json<MetadataListResponse>, ApiError> {
    let metadata = state.registry.list().await?;

    Ok(Json(MetadataListResponse { metadata }))
}

/// Start the API server, returning once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting registry API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IngestionConfig, S3Config};
    use crate::memory::{MemoryObjectStore, MemoryRecordStore, MemoryUrlIssuer};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    struct Harness {
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        issuer: Arc<MemoryUrlIssuer>,
        router: Router,
    }

    fn harness() -> Harness {
        let s3: S3Config = serde_json::from_str(r#"{"bucket": "audio"}"#).unwrap();
        let objects = Arc::new(MemoryObjectStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let issuer = Arc::new(MemoryUrlIssuer::new());

        let registry = Arc::new(Registry::new(
            objects.clone(),
            records.clone(),
            &s3,
            &IngestionConfig::default(),
        ));
        let urls = UrlService::new(issuer.clone(), &s3.bucket, Duration::from_secs(60));

        let router = create_router(AppState { registry, urls }, &ApiConfig::default());

        Harness {
            objects,
            records,
            issuer,
            router,
        }
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    const VALID: &str =
        r#"{"filename":"a.mp3","author":"x","label":"y","type":"z","words":"w"}"#;

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = send(&h.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reflects_record_store() {
        let h = harness();
        assert_eq!(send(&h.router, get("/ready")).await.0, StatusCode::OK);

        h.records.fail_reads(true);
        let (status, body) = send(&h.router, get("/ready")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_create_metadata_stored() {
        let h = harness();
        h.objects.insert("audio", "a.mp3", Default::default());

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", VALID)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "successfully stored");
        assert_eq!(h.records.len(), 1);
    }

    #[tokio::test]
    async fn test_create_metadata_status_codes() {
        let h = harness();

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", VALID)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "OBJECT_NOT_FOUND");

        h.objects.insert("audio", "a.mp3", Default::default());
        assert_eq!(
            send(&h.router, post_json("/api/v1/metadata", VALID)).await.0,
            StatusCode::CREATED
        );

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", VALID)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_validation_failure_lists_violations() {
        let h = harness();
        let body = r#"{"filename":"a.mp3","author":"","label":"y","words":"w"}"#;

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_FAILED");
        let details = body["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["field"], "author");
        assert_eq!(details[0]["rule"], "required");
        assert_eq!(details[1]["field"], "type");
        assert_eq!(h.objects.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let h = harness();

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", "{oops")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_dependency_failure_hides_cause() {
        let h = harness();
        h.objects.fail_key("a.mp3");

        let (status, body) = send(&h.router, post_json("/api/v1/metadata", VALID)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_list_metadata() {
        let h = harness();
        h.records
            .insert(MetadataRecord::new("a.mp3", "x", "y", "z", "w"));

        let (status, body) = send(&h.router, get("/api/v1/metadata")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"][0]["filename"], "a.mp3");
        assert_eq!(body["metadata"][0]["type"], "z");

        h.records.fail_reads(true);
        assert_eq!(
            send(&h.router, get("/api/v1/metadata")).await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_upload_url_binds_metadata() {
        let h = harness();

        let (status, body) = send(&h.router, post_json("/api/v1/audio", VALID)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(body["url"].as_str().unwrap().starts_with("memory://audio/a.mp3"));
        assert!(body["expires_at"].is_string());
        let attributes = h.issuer.signed_attributes("a.mp3").unwrap();
        assert_eq!(attributes.get("type").map(String::as_str), Some("z"));
    }

    #[tokio::test]
    async fn test_upload_url_rejects_invalid_submission() {
        let h = harness();

        let (status, _) = send(
            &h.router,
            post_json("/api/v1/audio", r#"{"filename":"a.mp3"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.issuer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_url_rejects_non_ascii_metadata() {
        let h = harness();
        let body = r#"{"filename":"a.mp3","author":"Motörhead","label":"y","type":"z","words":"w"}"#;

        let (status, body) = send(&h.router, post_json("/api/v1/audio", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "author");
        assert_eq!(body["details"][0]["rule"], "header_safe");
        assert_eq!(h.issuer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_download_url() {
        let h = harness();

        let (status, body) = send(&h.router, get("/api/v1/audio/a.mp3")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().contains("method=GET"));

        let (status, body) = send(&h.router, get("/api/v1/audio?filename=b.mp3")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap().starts_with("memory://audio/b.mp3"));

        let (status, body) = send(&h.router, get("/api/v1/audio")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0]["field"], "filename");
    }
}
