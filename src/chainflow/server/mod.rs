// SPDX-License-Identifier: MIT

//! HTTP decision surface
//!
//! Exposes triggers, unit inspection, operator decisions and a server-sent
//! event stream of unit lifecycle events.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::chainflow::engine::{Engine, UnitContext, UnitSnapshot};
use crate::runtime::error::{ChainError, ChainResult};

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chains", get(list_chains))
        .route("/api/triggers", post(fire_trigger))
        .route("/api/units", get(list_units).post(start_unit))
        .route("/api/units/{id}", get(get_unit))
        .route("/api/units/{id}/choice", post(select_chain))
        .route("/api/units/{id}/replacement", post(select_replacement))
        .route("/api/units/{id}/abort", post(abort_unit))
        .route("/api/events", get(stream_events))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Engine, port: u16) -> ChainResult<()> {
    if let Some(timeout) = engine.registry().settings().decision_timeout() {
        spawn_decision_sweeper(engine.clone(), timeout);
    }

    let app = router(engine);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically fail units whose decision has timed out
fn spawn_decision_sweeper(engine: Engine, timeout: Duration) {
    let period = (timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let expired = engine.expire_decisions(Utc::now()).await;
            if !expired.is_empty() {
                log::warn!("Decision timeout expired for units {:?}", expired);
            }
        }
    });
}

impl IntoResponse for ChainError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChainError::UnknownUnit(_) | ChainError::UnknownChain(_) => StatusCode::NOT_FOUND,
            ChainError::InvalidState { .. } | ChainError::DuplicateUnit(_) => {
                StatusCode::CONFLICT
            }
            ChainError::NotAnOption { .. } | ChainError::InvalidUnitId(_) => {
                StatusCode::BAD_REQUEST
            }
            ChainError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health_check(State(engine): State<Engine>) -> Json<Value> {
    let graph = engine.registry().snapshot().await;
    Json(json!({ "status": "ok", "graph_version": graph.version() }))
}

async fn list_chains(State(engine): State<Engine>) -> Json<Value> {
    let graph = engine.registry().snapshot().await;
    let chains: Vec<Value> = graph
        .chains()
        .iter()
        .map(|chain| {
            json!({
                "id": chain.id,
                "description": chain.description,
                "starting_link": graph.link(chain.starting_link).id,
            })
        })
        .collect();
    Json(json!(chains))
}

#[derive(Deserialize)]
struct TriggerRequest {
    path: String,
    content_type: String,
    #[serde(flatten)]
    context: UnitContext,
}

async fn fire_trigger(
    State(engine): State<Engine>,
    Json(payload): Json<TriggerRequest>,
) -> Result<Json<Value>, ChainError> {
    let mut context = payload.context;
    if context.path.is_none() {
        context.path = Some(payload.path.clone().into());
    }
    let unit = engine
        .trigger(&payload.path, &payload.content_type, context)
        .await?;
    Ok(Json(json!({ "matched": unit.is_some(), "unit": unit })))
}

#[derive(Deserialize)]
struct StartRequest {
    chain: String,
    #[serde(flatten)]
    context: UnitContext,
}

async fn start_unit(
    State(engine): State<Engine>,
    Json(payload): Json<StartRequest>,
) -> Result<(StatusCode, Json<Value>), ChainError> {
    let unit = engine.start_unit(&payload.chain, payload.context).await?;
    Ok((StatusCode::CREATED, Json(json!({ "unit": unit }))))
}

async fn list_units(State(engine): State<Engine>) -> Json<Vec<UnitSnapshot>> {
    Json(engine.units().await)
}

async fn get_unit(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<UnitSnapshot>, ChainError> {
    Ok(Json(engine.unit(&id).await?))
}

#[derive(Deserialize)]
struct ChoiceRequest {
    chain: String,
}

async fn select_chain(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(payload): Json<ChoiceRequest>,
) -> Result<Json<UnitSnapshot>, ChainError> {
    Ok(Json(engine.select_chain(&id, &payload.chain).await?))
}

#[derive(Deserialize)]
struct ReplacementRequest {
    dictionary: String,
}

async fn select_replacement(
    State(engine): State<Engine>,
    Path(id): Path<String>,
    Json(payload): Json<ReplacementRequest>,
) -> Result<Json<UnitSnapshot>, ChainError> {
    Ok(Json(
        engine.select_replacement(&id, &payload.dictionary).await?,
    ))
}

async fn abort_unit(
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<UnitSnapshot>, ChainError> {
    Ok(Json(engine.abort_unit(&id).await?))
}

async fn stream_events(
    State(engine): State<Engine>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(engine.subscribe())
        // Lagged receivers skip what they missed
        .filter_map(|event| event.ok())
        .map(|event| Ok(Event::default().json_data(event).unwrap_or_default()));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
