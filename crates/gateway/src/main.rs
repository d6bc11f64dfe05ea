use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use research_core::graph::GraphEngine;
use research_core::search::{DuckDuckGoSearch, HttpContentFetcher};
use research_domain::config::{Config, CorsConfig};
use research_providers::OpenAiCompatTransport;
use research_store::PersistenceStore;

mod api;
mod runtime;
mod state;

use runtime::SessionManager;
use state::AppState;

#[derive(Parser)]
#[command(name = "research-gateway", about = "Multi-agent deep-research HTTP service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "research.toml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Arc::new(Config::load_or_default(&cli.config).context("loading config")?);
    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,research_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("research gateway starting");

    let store = Arc::new(PersistenceStore::open(&config.persistence.database_path).context("opening persistence store")?);
    tracing::info!(path = %config.persistence.database_path, "persistence store ready");

    let transport = Arc::new(OpenAiCompatTransport::new(
        config.llm.endpoint.clone(),
        config.llm.model.clone(),
        config.llm.temperature,
        config.llm.max_tokens,
        config.llm.request_timeout_secs,
        config.llm.api_key.clone(),
    ));
    let web_search = Arc::new(DuckDuckGoSearch::new().context("building web search client")?);
    let content_fetcher = Arc::new(HttpContentFetcher::new().context("building content fetcher")?);
    let engine = Arc::new(GraphEngine::new(transport, web_search, content_fetcher));

    let sessions = SessionManager::new(store, engine, config.clone())
        .await
        .context("starting session manager")?;
    tracing::info!("session manager ready (crash recovery complete)");

    let app_state = AppState { config: config.clone(), sessions };

    let app = api::router()
        .layer(build_cors_layer(&config.server.cors))
        .with_state(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("binding listener")?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}

/// Builds the CORS layer from configured origins. A lone `"*"` entry means
/// fully permissive (credentials disabled, since the two are incompatible);
/// otherwise origins are matched exactly, with a `host:*` suffix allowed as
/// a numeric-port wildcard.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
