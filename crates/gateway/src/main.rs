//! ReplyLens Gateway
//!
//! Runs the comment pipeline and serves its results.
//! Handles:
//! - Pipeline runs behind a cooldown gate
//! - Aggregate sentiment and analysis report reads
//! - Storage statistics and operator reset
//! - Observability (logging, metrics)

mod auth;
mod handlers;
mod pipeline;
mod run_gate;

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use replylens_common::{
    annotator::create_annotator,
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository},
    metrics,
};
use replylens_ingestion::BilibiliClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::pipeline::Pipeline;
use crate::run_gate::RunGate;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repository: Repository,
    pub pipeline: Arc<Pipeline>,
    pub annotator_model: Arc<str>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config.observability);
    info!("Starting ReplyLens Gateway v{}", replylens_common::VERSION);

    // Initialize metrics
    init_metrics(&config.observability)?;
    metrics::register_metrics();

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    let repository = Repository::new(db);

    // Upstream source and annotation oracle
    let source = Arc::new(BilibiliClient::new(&config.upstream)?);
    let annotator = create_annotator(&config.annotation)?;
    let annotator_model: Arc<str> = Arc::from(annotator.model_name());
    info!(model = %annotator_model, max_in_flight = config.enrichment.max_in_flight, "Annotator ready");
    if config.admin_token().is_none() {
        info!("No admin token configured, operator routes disabled");
    }

    let gate = Arc::new(RunGate::new(config.cooldown()));
    info!(cooldown_secs = gate.cooldown().as_secs(), "Run gate ready");
    let pipeline = Arc::new(Pipeline::new(repository.clone(), source, annotator, gate, &config));

    // Create app state
    let state = AppState {
        config: config.clone(),
        repository,
        pipeline,
        annotator_model,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

/// Install the Prometheus exporter; port 0 disables it
fn init_metrics(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.metrics_port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Suffix("annotation_duration_seconds".to_string()),
            metrics::ANNOTATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("pipeline_duration_seconds".to_string()),
            metrics::PIPELINE_BUCKETS,
        )?
        .install()?;

    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Bounds how long a caller waits; runs continue on their own task
    let timeout = TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, state.config.request_timeout());

    let mut api_routes = Router::new()
        // Pipeline
        .route("/runs", post(handlers::runs::start_run))

        // Per-video reads
        .route("/videos/{aid}/sentiment", get(handlers::videos::get_sentiment))
        .route("/videos/{aid}/report", get(handlers::videos::get_report))

        // Storage
        .route("/stats", get(handlers::admin::get_stats));

    // Operator reset exists only when a token is configured
    if state.config.admin_token().is_some() {
        api_routes = api_routes.route("/admin/data", delete(handlers::admin::clear_data));
    }

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api/v1", api_routes)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{credential, pipeline_with, StubSource, AID, BVID};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use replylens_common::annotator::{AnnotationRequest, Annotator, MockAnnotator};
    use replylens_common::Annotation;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    const ADMIN_TOKEN: &str = "op-secret";

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.admin_token = Some(ADMIN_TOKEN.to_string());
        config
    }

    async fn app_with(config: AppConfig, cooldown: Duration, annotator: Arc<dyn Annotator>) -> Router {
        let gate = Arc::new(RunGate::new(cooldown));
        let (pipeline, repository) = pipeline_with(StubSource::new(), annotator, gate).await;

        create_router(AppState {
            config: Arc::new(config),
            repository,
            pipeline: Arc::new(pipeline),
            annotator_model: Arc::from("mock-annotator"),
        })
    }

    async fn app(cooldown: Duration) -> Router {
        app_with(config(), cooldown, Arc::new(MockAnnotator::with_scores(0.9, 1.0))).await
    }

    /// Scores like the mock, but only after a fixed delay
    struct SlowAnnotator {
        delay: Duration,
    }

    #[async_trait]
    impl Annotator for SlowAnnotator {
        async fn annotate(&self, _request: &AnnotationRequest) -> replylens_common::Result<Annotation> {
            tokio::time::sleep(self.delay).await;
            Ok(Annotation::new(0.8, 1.0, ["slow"]))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn start_run(bvid: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/runs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "bvid": bvid, "credential": credential(), "pages": 2 }).to_string(),
            ))
            .unwrap()
    }

    fn clear_data(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("DELETE").uri("/api/v1/admin/data");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Duration::ZERO).await;
        let (status, _, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _, body) = send(&app, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["store"]["up"], true);
        assert_eq!(body["store"]["counts"]["comment_count"], 0);
        assert_eq!(body["enrichment"]["max_in_flight"], 15);
        assert_eq!(body["pipeline"]["operator_routes"], true);
    }

    #[tokio::test]
    async fn test_sentiment_defaults_to_neutral() {
        let app = app(Duration::ZERO).await;
        let (status, _, body) = send(&app, get("/api/v1/videos/12345/sentiment")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["aggregate_sentiment"], 0.5);
        assert_eq!(body["label"], "neutral");
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_bad_request() {
        let app = app(Duration::ZERO).await;
        let (status, _, body) = send(&app, start_run("BV123")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_IDENTIFIER");
    }

    #[tokio::test]
    async fn test_run_then_read_back() {
        let app = app(Duration::ZERO).await;

        let (status, _, summary) = send(&app, start_run(BVID)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["persisted"], 10);
        assert_eq!(summary["video"]["aid"], AID);

        let (_, _, stats) = send(&app, get("/api/v1/stats")).await;
        assert_eq!(stats["video_count"], 1);
        assert_eq!(stats["comment_count"], 10);

        let (status, _, report) = send(&app, get(&format!("/api/v1/videos/{}/report", AID))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["comment_count"], 10);
        assert_eq!(report["comments"][0]["kind"], "main");
        assert_eq!(report["comments"][0]["label"], "positive");

        let (_, _, sentiment) = send(&app, get(&format!("/api/v1/videos/{}/sentiment", AID))).await;
        assert_eq!(sentiment["label"], "positive");
    }

    #[tokio::test]
    async fn test_report_for_unknown_video_is_not_found() {
        let app = app(Duration::ZERO).await;
        let (status, _, body) = send(&app, get("/api/v1/videos/1/report")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "VIDEO_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_second_run_within_cooldown_is_throttled() {
        let app = app(Duration::from_secs(10)).await;

        let (status, _, _) = send(&app, start_run(BVID)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, body) = send(&app, start_run(BVID)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(body["error"]["code"], "THROTTLED");
    }

    #[tokio::test]
    async fn test_request_timeout_does_not_cancel_run() {
        let mut config = config();
        config.server.request_timeout_secs = 1;
        let annotator = Arc::new(SlowAnnotator {
            delay: Duration::from_millis(1500),
        });
        let app = app_with(config, Duration::from_secs(60), annotator).await;

        let (status, _, _) = send(&app, start_run(BVID)).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        // The detached run finishes enrichment and persists the whole batch
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let (_, _, stats) = send(&app, get("/api/v1/stats")).await;
        assert_eq!(stats["video_count"], 1);
        assert_eq!(stats["comment_count"], 10);

        let (_, _, report) = send(&app, get(&format!("/api/v1/videos/{}/report", AID))).await;
        assert_eq!(report["comments"][0]["tags_display"], "slow");
    }

    #[tokio::test]
    async fn test_operator_reset_requires_token() {
        let app = app(Duration::from_secs(10)).await;
        send(&app, start_run(BVID)).await;

        let (status, _, body) = send(&app, clear_data(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, _, body) = send(&app, clear_data(Some("wrong-token"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (_, _, stats) = send(&app, get("/api/v1/stats")).await;
        assert_eq!(stats["comment_count"], 10);
    }

    #[tokio::test]
    async fn test_operator_reset() {
        let app = app(Duration::from_secs(10)).await;
        send(&app, start_run(BVID)).await;

        let (status, _, _) = send(&app, clear_data(Some(ADMIN_TOKEN))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, _, stats) = send(&app, get("/api/v1/stats")).await;
        assert_eq!(stats["comment_count"], 0);

        // Reset also reopens the cooldown
        let (status, _, _) = send(&app, start_run(BVID)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reset_route_absent_without_token() {
        let app = app_with(AppConfig::default(), Duration::ZERO, Arc::new(MockAnnotator::new())).await;
        send(&app, start_run(BVID)).await;

        let (status, _, _) = send(&app, clear_data(Some(ADMIN_TOKEN))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, _, stats) = send(&app, get("/api/v1/stats")).await;
        assert_eq!(stats["comment_count"], 10);

        let (_, _, ready) = send(&app, get("/ready")).await;
        assert_eq!(ready["pipeline"]["operator_routes"], false);
    }
}
