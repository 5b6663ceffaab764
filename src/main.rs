// Main entry point for the bubble translation service

use bubble_translate::{
    core::{find_language, Config, LANGUAGES},
    orchestration::BubbleTranslator,
    services::fetch_image,
    utils::Metrics,
};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_LANG: &str = "en";

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    translator: Arc<BubbleTranslator>,
    http: reqwest::Client,
    metrics: Metrics,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "bubble_translate={level},tower_http={level}",
        level = match config.server.log_level {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== BUBBLE TRANSLATOR ===");
    info!(
        "Config: scale={} ocr={} ({}) concurrency={} ai={} fallback={}",
        config.segmentation.scale,
        config.ocr.program,
        config.ocr.language,
        config.ocr.concurrency,
        if config.ai_configured() { "ON" } else { "OFF" },
        if config.translation.fallback_enabled { "ON" } else { "OFF" }
    );

    // Initialize metrics
    let metrics = Metrics::new();

    info!("Initializing bubble translator...");
    let translator = Arc::new(BubbleTranslator::from_config(config.clone(), metrics.clone())?);
    let state = AppState {
        config: config.clone(),
        translator,
        http: reqwest::Client::new(),
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/translate", post(translate_upload))
        .route("/translate-url", post(translate_url))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.server.body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /              - Root endpoint");
    info!("  GET  /health        - Health check");
    info!("  GET  /metrics       - Prometheus metrics");
    info!("  GET  /stats         - Detailed statistics");
    info!("  POST /translate     - Translate an uploaded screenshot (multipart/form-data)");
    info!("  POST /translate-url - Translate a screenshot by URL (JSON)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "Chat Bubble Translator"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let breaker = state.translator.translation_breaker();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "ai_translation": {
            "configured": state.config.ai_configured(),
            "breaker": breaker,
        },
        "languages": LANGUAGES.iter().map(|l| l.code).collect::<Vec<_>>(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

/// Translate an uploaded screenshot
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": the screenshot (PNG/JPEG/WebP/...)
/// - Field "lang" (optional): target language code, default "en"
///
/// # Response:
/// - `image/png` with every detected bubble translated
async fn translate_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.record_endpoint_request("/translate");

    let mut image: Option<Bytes> = None;
    let mut lang = DEFAULT_LANG.to_string();

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
                image = Some(data);
            }
            "lang" => {
                lang = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| (StatusCode::BAD_REQUEST, "No image provided".to_string()))?;
    run_translation(&state, &image, &lang).await
}

#[derive(Debug, Deserialize)]
struct TranslateUrlRequest {
    url: String,
    #[serde(default)]
    lang: Option<String>,
}

/// Fetch a screenshot by URL and translate it
async fn translate_url(
    State(state): State<AppState>,
    Json(request): Json<TranslateUrlRequest>,
) -> Result<Response, ApiError> {
    state.metrics.record_endpoint_request("/translate-url");

    let timeout = Duration::from_millis(state.config.server.fetch_timeout_ms);
    let image = fetch_image(&state.http, &request.url, timeout).await.map_err(|e| {
        warn!("Fetch failed for {}: {}", request.url, e);
        (StatusCode::BAD_GATEWAY, format!("Could not fetch image: {}", e))
    })?;

    let lang = request.lang.as_deref().unwrap_or(DEFAULT_LANG);
    run_translation(&state, &image, lang).await
}

async fn run_translation(state: &AppState, image: &[u8], lang: &str) -> Result<Response, ApiError> {
    let start_time = Instant::now();

    let language = find_language(lang).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!(
                "Unsupported language '{}', expected one of: {}",
                lang.trim(),
                LANGUAGES.iter().map(|l| l.code).collect::<Vec<_>>().join(", ")
            ),
        )
    })?;

    info!("Received translate request ({} bytes, {})", image.len(), language.code);

    let (png, report) = state
        .translator
        .translate_bubbles_with_report(image, language.code)
        .await
        .map_err(|e| {
            error!("Translation failed: {}", e);
            let status = match e {
                bubble_translate::PipelineError::Decode(_)
                | bubble_translate::PipelineError::EmptyImage { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, format!("Processing failed: {}", e))
        })?;

    info!(
        "Request completed in {:.2}s: {} bubbles, {} rendered",
        start_time.elapsed().as_secs_f64(),
        report.bubbles,
        report.rendered
    );

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
