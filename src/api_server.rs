//! HTTP/WebSocket surface.
//!
//! `/ws` drives the live agent workflow: the client sends one JSON request
//! per run and receives plain progress lines plus `TASK_LIST_UPDATE:` framed
//! task snapshots. The JSON endpoints mirror the rest of the backend surface
//! (model discovery, one-shot chat, health).

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{env_u32, AgentConfig, RunModels};
use crate::error::AgentError;
use crate::llm_gateway::{Completion, LLMClient};
use crate::notify::ChannelSink;
use crate::orchestrator::Orchestrator;
use crate::tools::ToolRegistry;

#[derive(Clone)]
pub struct AppState {
    pub llm: LLMClient,
    pub tools: Arc<ToolRegistry>,
    pub config: Arc<AgentConfig>,
    pub default_models: RunModels,
}

#[derive(Deserialize)]
pub struct ChatInput {
    pub query: String,
    pub model: Option<String>,
}

/// Start the HTTP API server.
pub async fn start_api_server(
    llm: LLMClient,
    tools: Arc<ToolRegistry>,
    config: Arc<AgentConfig>,
    default_models: RunModels,
) -> Result<(), AgentError> {
    let state = AppState {
        llm,
        tools,
        config,
        default_models,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/models", get(list_models_handler))
        .route("/api/chat", post(chat_handler))
        .route("/ws", get(ws_handler));

    let frontend_dir = std::env::var("FRONTEND_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("frontend"));
    if frontend_dir.join("index.html").is_file() {
        println!("📁 Serving static frontend from {}", frontend_dir.display());
        app = app.fallback_service(
            ServeDir::new(&frontend_dir).append_index_html_on_directories(true),
        );
    } else {
        println!(
            "⚠️ Frontend directory '{}' not found; serving status banner at /.",
            frontend_dir.display()
        );
        app = app.route("/", get(root_handler));
    }

    let app = app.layer(TraceLayer::new_for_http()).layer(cors).with_state(state);

    let port = env_u32("AGENT_API_PORT", 8000) as u16;
    println!("🌐 Agent backend running on http://localhost:{}", port);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "online",
        "service": "Local Task Agent Backend",
        "docs": "/api/health"
    }))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_models_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.llm.list_local_models().await {
        Ok(models) => (StatusCode::OK, Json(json!({ "models": models }))),
        Err(e) => {
            println!("❌ Failed to list models: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("Failed to retrieve models from Ollama: {}", e) })),
            )
        }
    }
}

/// Basic HTTP endpoint for simple prompts (no agent workflow).
async fn chat_handler(
    State(state): State<AppState>,
    Json(input): Json<ChatInput>,
) -> impl IntoResponse {
    let model = input.model.unwrap_or_else(|| state.default_models.planner.clone());
    match state.llm.complete(&model, &input.query, None).await {
        Ok(Some(answer)) => (StatusCode::OK, Json(json!({ "response": answer }))),
        Ok(None) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "LLM communication failed." })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": format!("LLM Error: {}", e) })),
        ),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    println!("🔌 WebSocket connection accepted.");
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task drains progress lines to the client; the workflow never
    // blocks on the socket.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if ws_tx.send(Message::Text(line)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let sink = ChannelSink::new(line_tx.clone());
    // Model choices stick per connection and can be swapped between queries.
    let mut models = state.default_models.clone();

    loop {
        let text = match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!("WebSocket receive error: {}", e);
                break;
            }
        };

        let payload: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                println!("⚠️ Invalid JSON via WebSocket: {}...", truncate(&text, 100));
                let _ = line_tx.send("Agent Error: Invalid JSON payload received.".to_string());
                continue;
            }
        };

        if let Some(m) = payload.get("planner_model").and_then(Value::as_str) {
            models.planner = m.to_string();
        }
        if let Some(m) = payload.get("browser_model").and_then(Value::as_str) {
            models.browser = m.to_string();
        }
        if let Some(m) = payload.get("code_model").and_then(Value::as_str) {
            models.code = m.to_string();
        }

        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if query.is_empty() {
            let _ = line_tx.send("Agent Error: Received empty query.".to_string());
            continue;
        }
        println!(
            "📨 Query: '{}...', Planner: {}, Browser: {}, Code: {}",
            truncate(&query, 50),
            models.planner,
            models.browser,
            models.code
        );

        let orchestrator = Orchestrator::new(
            Arc::new(state.llm.clone()),
            state.tools.clone(),
            state.config.clone(),
            models.clone(),
        );

        // A dropped connection cancels the in-flight run at its next
        // suspension point instead of letting it finish silently.
        tokio::select! {
            _ = orchestrator.run(&query, &sink) => {}
            _ = wait_for_close(&mut ws_rx, &line_tx) => {
                println!("🔌 Client disconnected mid-run; workflow aborted.");
                break;
            }
        }
    }

    drop(sink);
    drop(line_tx);
    let _ = writer.await;
    println!("🔌 WebSocket connection closed.");
}

/// Resolve when the client goes away. Messages arriving while a workflow is
/// in flight are acknowledged but not processed.
async fn wait_for_close(
    ws_rx: &mut SplitStream<WebSocket>,
    line_tx: &mpsc::UnboundedSender<String>,
) {
    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(_)) => return,
            Some(Ok(_)) => {
                let _ = line_tx
                    .send("Agent: A workflow is already running; message ignored.".to_string());
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
