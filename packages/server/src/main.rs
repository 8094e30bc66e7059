use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method, header};
use gateway::{FailureClassifier, init_gateway};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::config::{AppConfig, CorsConfig};
use server::sms::scheduler::run_scheduler;
use server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = server::database::init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    server::seed::ensure_indexes(&db)
        .await
        .context("Failed to create indexes")?;

    let gateway = init_gateway(&config.gateway).context("Failed to initialize SMS gateway")?;
    let classifier = FailureClassifier::default();

    if config.sms.scheduler.enabled {
        tokio::spawn(run_scheduler(
            db.clone(),
            gateway.clone(),
            classifier.clone(),
            config.sms.clone(),
        ));
    } else {
        info!("SMS scheduler disabled, waiting for job endpoint calls");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let cors = cors_layer(&config.server.cors);

    let state = AppState {
        db,
        config,
        gateway,
        classifier,
    };

    let app = server::build_router(state).layer(cors);

    info!("Server running at http://{}", addr);
    info!("Swagger UI at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let allowed = config
        .allow_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-cron-secret"),
            HeaderName::from_static("x-callback-secret"),
        ])
        .max_age(Duration::from_secs(config.max_age))
}
