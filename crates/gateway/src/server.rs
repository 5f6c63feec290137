//! HTTP surface: health, the websocket upgrade and the agent REST routes.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        extract::{Path, State, WebSocketUpgrade},
        http::StatusCode,
        response::IntoResponse,
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tower_http::cors::{Any, CorsLayer},
    tracing::info,
};

use {
    beacon_config::BeaconConfig,
    beacon_dispatch::{DispatchError, Priority},
    beacon_protocol::{CommandResponsePayload, ErrorShape, PROTOCOL_VERSION, now_ms},
};

use crate::{services::GatewayServices, state::GatewayState, ws};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

pub fn build_gateway_app(gateway: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{agent_id}/commands", post(dispatch_command))
        .route("/api/commands/broadcast", post(broadcast_command))
        .route("/api/commands/{command_id}", get(get_command))
        .route("/api/commands/{command_id}/response", post(post_response))
        .layer(cors)
        .with_state(AppState { gateway })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let gateway = &state.gateway;
    let agents = gateway.engine.read().await.registry.count();
    Json(json!({
        "status": "ok",
        "version": gateway.version,
        "protocol": PROTOCOL_VERSION,
        "hostname": gateway.hostname,
        "uptimeMs": now_ms() - gateway.started_at,
        "connections": gateway.session_count().await,
        "agents": agents,
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state.gateway))
}

async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    let engine = state.gateway.engine.read().await;
    let agents: Vec<Value> = engine
        .registry
        .list()
        .map(|a| {
            json!({
                "agentId": a.agent_id,
                "platform": a.platform,
                "status": a.status,
                "connectedAt": a.connected_at,
                "lastSeen": a.last_seen,
                "reachable": a.is_reachable(),
            })
        })
        .collect();
    Json(json!({"agents": agents, "total": agents.len()}))
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    module: String,
    action: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    priority: Option<Priority>,
}

fn dispatch_error_response(err: DispatchError) -> (StatusCode, Json<ErrorShape>) {
    let status = match &err {
        DispatchError::AgentNotFound(_) | DispatchError::CommandNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DispatchError::AgentUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorShape::new(err.code(), err.to_string())))
}

async fn dispatch_command(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> impl IntoResponse {
    let gateway = &state.gateway;
    let now = now_ms();
    let mut engine = gateway.engine.write().await;
    engine.sweep(now);

    let seq = gateway.next_seq();
    match engine.dispatch_from_request(
        &agent_id,
        &req.module,
        &req.action,
        req.params.unwrap_or_else(|| json!({})),
        req.priority.unwrap_or_default(),
        seq,
        now,
    ) {
        Ok(command_id) => {
            (StatusCode::OK, Json(json!({"commandId": command_id, "status": "sent"})))
                .into_response()
        }
        Err(err) => dispatch_error_response(err).into_response(),
    }
}

async fn broadcast_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Json<Value> {
    let gateway = &state.gateway;
    let now = now_ms();
    let mut engine = gateway.engine.write().await;
    engine.sweep(now);

    let deliveries = engine.broadcast(
        &req.module,
        &req.action,
        req.params.unwrap_or_else(|| json!({})),
        req.priority.unwrap_or_default(),
        || gateway.next_seq(),
        now,
    );
    let delivered = deliveries.iter().filter(|d| d.delivered).count();
    Json(json!({
        "total": deliveries.len(),
        "delivered": delivered,
        "deliveries": deliveries,
    }))
}

async fn get_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> impl IntoResponse {
    let engine = state.gateway.engine.read().await;
    match engine.get_command(&command_id) {
        Some((command, response)) => {
            Json(json!({"command": command, "response": response})).into_response()
        }
        None => dispatch_error_response(DispatchError::CommandNotFound(command_id)).into_response(),
    }
}

/// REST fallback for agents that cannot hold a socket open long enough to
/// report results in-band.
async fn post_response(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    Json(mut payload): Json<CommandResponsePayload>,
) -> impl IntoResponse {
    // The path segment is authoritative for correlation.
    payload.command_id = command_id;
    let mut engine = state.gateway.engine.write().await;
    match engine.record_response(&payload, now_ms()) {
        Ok(()) => Json(json!({"status": "recorded"})).into_response(),
        Err(err) => dispatch_error_response(err).into_response(),
    }
}

/// Bind the listener and serve until the process is stopped.
pub async fn start_gateway(config: &BeaconConfig, services: GatewayServices) -> anyhow::Result<()> {
    let state = GatewayState::new(config, services);
    let app = build_gateway_app(state.clone());

    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        version = state.version,
        hostname = %state.hostname,
        "gateway listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
