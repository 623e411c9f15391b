//! On-demand HTTP endpoint.
//!
//! `GET /scrapePDP?url=...` always answers 200 with a one-element JSON list:
//! the record, or `{ITEM_ID?, error, url}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::harvester::Harvester;

#[derive(Debug, Deserialize)]
pub struct ScrapeParams {
    url: Option<String>,
}

/// Create the router with all routes.
pub fn create_router(harvester: Arc<Harvester>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/docs", get(docs))
        .route("/health", get(health))
        .route("/scrapePDP", get(scrape_pdp))
        .with_state(harvester)
}

pub async fn serve(harvester: Arc<Harvester>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(harvester)).await
}

async fn root() -> Redirect {
    Redirect::temporary("/docs")
}

async fn docs() -> Json<Value> {
    Json(json!({
        "name": "goofish-scraper",
        "version": crate::VERSION,
        "endpoints": {
            "GET /scrapePDP?url=<item url>": "scrape one item page, returns a one-element list",
            "GET /health": "liveness probe",
        },
    }))
}

async fn health(State(harvester): State<Arc<Harvester>>) -> Json<Value> {
    let global = harvester.metrics().snapshot().global;
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "attempts": global.attempts,
        "rotations": global.rotations,
    }))
}

async fn scrape_pdp(
    State(harvester): State<Arc<Harvester>>,
    Query(params): Query<ScrapeParams>,
) -> impl IntoResponse {
    let url = params.url.unwrap_or_default();
    let report = harvester.scrape(&url).await;
    Json(vec![report.to_json()])
}
