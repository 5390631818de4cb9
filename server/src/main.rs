use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use llm_core::OpenAiClient;
use meditation_server::{api_router, AppState, ServerConfig};
use tts_core::OpenAiSpeechClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::OPTIONS,
    ];
    let permissive = || {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods.clone())
            .allow_headers(tower_http::cors::Any)
            .expose_headers([axum::http::HeaderName::from_static("x-stream-id")])
            .allow_credentials(false)
    };

    match config.cors_allowed_origins {
        Some(ref allowed_origins) => {
            let origins: Vec<axum::http::HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
                .collect();

            if origins.is_empty() {
                warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
                permissive()
            } else {
                info!("CORS configured for {} origin(s)", origins.len());
                CorsLayer::new()
                    .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                    .allow_methods(methods.clone())
                    .allow_headers(tower_http::cors::Any)
                    .expose_headers([axum::http::HeaderName::from_static("x-stream-id")])
                    .allow_credentials(false)
            }
        }
        None => {
            // development: allow all origins
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            permissive()
        }
    }
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting meditation streaming server...");

    let config = ServerConfig::from_env();
    let generator = Arc::new(OpenAiClient::from_env()?);
    let synthesizer = Arc::new(OpenAiSpeechClient::from_env()?);

    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, llm_timeout={}s, model={}, voice={}, format={}",
        config.port,
        config.rate_limit_per_minute,
        config.llm_timeout_secs,
        config.llm_model,
        config.speech.voice,
        config.speech.format,
    );

    let cors = cors_layer(&config);

    // Global key: every request shares one limit, which behaves the same
    // behind proxies where client IPs are not reliable
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_interval_ms())
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let state = AppState::new(generator, synthesizer, config.clone());
    let app = api_router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
