use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

use marvin_core::{GitHubClient, RosterSelector, WorkflowConfig};
use marvin_server::config::Config;
use marvin_server::triage_loop::{triage_loop, TriageRunner};
use marvin_server::webhook::webhook_router;
use marvin_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "marvin",
        "version": marvin_server::get_bot_version(),
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting marvin {}", marvin_server::get_bot_version());

    let config =
        Config::from_env().context("Failed to load configuration from environment variables")?;

    let github_client = GitHubClient::with_api_base(
        config.github_app_id,
        config.github_private_key.clone(),
        &config.github_api_url,
    )?;

    let selector = RosterSelector::new(config.reviewers.clone(), config.mergers.clone());
    if selector.is_empty() {
        warn!("No reviewers configured; pull requests will wait in needs_reviewer");
    }

    let app_state = Arc::new(AppState {
        github_client,
        workflow: WorkflowConfig::new(config.bot_name.clone()),
        selector: Arc::new(selector),
        webhook_secret: config.webhook_secret.clone(),
        triage: TriageRunner::new(config.triage_deadline),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    match config.triage_interval {
        Some(period) => {
            info!("Running triage every {}s", period.as_secs());
            let triage_state = app_state.clone();
            tokio::spawn(async move {
                triage_loop(triage_state, period).await;
            });
        }
        None => info!("Periodic triage disabled"),
    }

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
