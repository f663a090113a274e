use crate::application::agent::{AgentExecutor, ConversationState};
use crate::application::bridge::{DiscoveryFailure, ToolInventory};
use crate::application::stream::{collect_buffered, finalize_response, fragment_stream};
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub struct ServerState {
    executor: Arc<dyn AgentExecutor>,
    inventory: Arc<ToolInventory>,
}

impl ServerState {
    pub fn new(executor: Arc<dyn AgentExecutor>, inventory: Arc<ToolInventory>) -> Self {
        Self {
            executor,
            inventory,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(root_handler, tools_handler, chat_handler),
    components(schemas(ChatRequestBody, ErrorResponse, ToolListResponse, ToolDescriptor)),
    tags(
        (name = "chat", description = "Relay a message through the agent loop"),
        (name = "tools", description = "Discovered MCP tools")
    )
)]
struct ApiDoc;

pub async fn serve(
    executor: Arc<dyn AgentExecutor>,
    inventory: Arc<ToolInventory>,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let api = ApiDoc::openapi();
    info!(%addr, "Binding REST server");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(ServerState::new(executor, inventory));
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", api))
        .route("/", get(root_handler))
        .route("/tools", get(tools_handler))
        .route("/chat", post(chat_handler))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "REST server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}

#[derive(Debug, Deserialize, ToSchema)]
struct ChatRequestBody {
    message: String,
    #[serde(default)]
    streaming: bool,
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ToolDescriptor {
    name: String,
    description: String,
    server: String,
}

#[derive(Debug, Serialize, ToSchema)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
    #[schema(value_type = Vec<Object>)]
    failures: Vec<DiscoveryFailure>,
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner"))
)]
async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the heron MCP bridge" }))
}

#[utoipa::path(
    get,
    path = "/tools",
    tag = "tools",
    responses((status = 200, description = "Discovered tools and per-server failures", body = ToolListResponse))
)]
async fn tools_handler(State(state): State<Arc<ServerState>>) -> Json<ToolListResponse> {
    debug!(tool_count = state.inventory.len(), "Serving /tools request");
    let tools = state
        .inventory
        .tools()
        .iter()
        .map(|tool| ToolDescriptor {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            server: tool.server().to_string(),
        })
        .collect();
    Json(ToolListResponse {
        tools,
        failures: state.inventory.failures().to_vec(),
    })
}

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequestBody,
    responses(
        (status = 200, description = "Assembled answer, or a plain-text fragment stream when `streaming` is set"),
        (status = 400, description = "Empty message", body = ErrorResponse),
        (status = 500, description = "Agent loop could not be started", body = ErrorResponse)
    )
)]
async fn chat_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ChatRequestBody>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    info!(streaming = payload.streaming, "Received /chat request");

    if payload.message.trim().is_empty() {
        error!("Rejecting /chat request due to empty message");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "message content is required".to_string(),
            }),
        ));
    }

    let conversation = ConversationState::from_prompt(payload.message);
    let chunks = match state.executor.stream(conversation).await {
        Ok(chunks) => chunks,
        Err(err) => {
            error!(error = %err, "Agent loop failed to start");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: err.user_message(),
                }),
            ));
        }
    };

    if payload.streaming {
        // Each fragment goes out the moment it is extracted; the connection
        // closing is the only end-of-stream marker.
        let body = Body::from_stream(fragment_stream(chunks).map(Ok::<_, Infallible>));
        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response())
    } else {
        let answer = collect_buffered(chunks).await;
        Ok(Json(finalize_response(&answer)).into_response())
    }
}
