use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    serve, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::agent::AgentStep;
use crate::chat::{ChatService, SidebarUpdate, TurnOutcome};
use crate::constants::{GREETING, STATIC_DIR, TEMPLATES_DIR};
use crate::form::ConnectionForm;
use crate::session::ChatSession;

/// Messages sent to the browser. `payload` depends on `message_type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    fn new(message_type: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
        }
    }

    fn transcript(session: &ChatSession) -> Self {
        Self::new("Transcript", serde_json::json!({ "messages": session.messages() }))
    }

    fn history(session: &ChatSession) -> Self {
        Self::new(
            "QueryHistory",
            serde_json::json!({ "entries": session.numbered_history() }),
        )
    }

    fn notice(text: &str) -> Self {
        Self::new("Notice", serde_json::json!({ "message": text }))
    }

    fn error(text: &str) -> Self {
        Self::new("Error", serde_json::json!({ "message": text }))
    }

    fn step(step: &AgentStep) -> Self {
        Self::new("AgentStep", serde_json::json!(step))
    }
}

impl From<SidebarUpdate> for ServerMessage {
    fn from(update: SidebarUpdate) -> Self {
        match update {
            SidebarUpdate::Notice(text) => ServerMessage::notice(&text),
            SidebarUpdate::Error(text) => ServerMessage::error(&text),
            SidebarUpdate::Schema(tables) => {
                ServerMessage::new("Schema", serde_json::json!({ "tables": tables }))
            }
        }
    }
}

/// Messages the browser sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Configure { form: ConnectionForm },
    Ask { question: String },
    Clear,
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    chat: Arc<ChatService>,
    model_name: String,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, model_name: &str) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env()),
            chat,
            model_name: model_name.to_string(),
        }
    }
}

fn create_minijinja_env() -> AutoReloader {
    AutoReloader::new(|notifier| {
        let templates_dir = TEMPLATES_DIR.as_str();
        let mut env = Environment::new();
        env.set_loader(path_loader(templates_dir));
        notifier.watch_path(templates_dir, true);
        Ok(env)
    })
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Html<String>, axum::response::Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "SQLMate : Chat with your SQL DB",
                    greeting => GREETING,
                    model => state.model_name.as_str(),
                };
                tmpl.render(context)
            })
        })
        .map(axum::response::Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            axum::response::Html(format!("Internal Server Error: {}", e))
        })
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json_msg) => socket.send(Message::Text(json_msg)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// One websocket connection is one browser session: the transcript, history
/// and form live here and die with the connection. Client messages are
/// handled one at a time.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut session = ChatSession::new();
    let mut form = ConnectionForm::default();
    info!(session = %session.id, "New WebSocket session established");

    if !send_json(&mut socket, &ServerMessage::transcript(&session)).await {
        warn!("Failed to send initial transcript to new WebSocket client");
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Client requested WebSocket close");
                break;
            }
            Message::Binary(_) => {
                warn!("Received unexpected binary message from client");
                continue;
            }
            // Axum answers pings itself
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Malformed client message: {}", e);
                if !send_json(&mut socket, &ServerMessage::error("Malformed message")).await {
                    break;
                }
                continue;
            }
        };

        let keep_open = match client_msg {
            ClientMessage::Configure { form: submitted } => {
                debug!(form = ?submitted, "Applying connection form");
                form = submitted;
                let mut ok = true;
                for update in state.chat.configure(&form).await {
                    ok &= send_json(&mut socket, &ServerMessage::from(update)).await;
                }
                ok
            }
            ClientMessage::Clear => {
                session.clear_messages();
                send_json(&mut socket, &ServerMessage::transcript(&session)).await
            }
            ClientMessage::Ask { question } => {
                handle_question(&mut socket, &state, &mut session, &form, &question).await
            }
        };
        if !keep_open {
            warn!("WebSocket client disconnected or send error. Closing connection.");
            break;
        }
    }
    info!(session = %session.id, "WebSocket session closed");
}

/// Run one turn, forwarding agent steps to the browser while the agent works.
async fn handle_question(
    socket: &mut WebSocket,
    state: &AppState,
    session: &mut ChatSession,
    form: &ConnectionForm,
    question: &str,
) -> bool {
    let (tx, mut rx) = mpsc::unbounded_channel::<AgentStep>();
    let outcome = {
        let turn = state.chat.submit(session, form, question, Some(&tx));
        tokio::pin!(turn);
        loop {
            tokio::select! {
                outcome = &mut turn => break outcome,
                Some(step) = rx.recv() => {
                    if !send_json(socket, &ServerMessage::step(&step)).await {
                        return false;
                    }
                }
            }
        }
    };
    drop(tx);
    while let Ok(step) = rx.try_recv() {
        if !send_json(socket, &ServerMessage::step(&step)).await {
            return false;
        }
    }

    let mut replies = Vec::new();
    match outcome {
        TurnOutcome::Ignored => return true,
        TurnOutcome::Notice(text) => replies.push(ServerMessage::notice(&text)),
        TurnOutcome::Failed(text) => {
            replies.push(ServerMessage::error(&text));
            replies.push(ServerMessage::transcript(session));
            replies.push(ServerMessage::history(session));
        }
        TurnOutcome::Answered(answer) => {
            replies.push(ServerMessage::new("Answer", serde_json::json!(answer)));
            replies.push(ServerMessage::transcript(session));
            replies.push(ServerMessage::history(session));
        }
    }
    for reply in &replies {
        if !send_json(socket, reply).await {
            return false;
        }
    }
    true
}

pub fn build_router(state: AppState) -> Router {
    // Serve static files from the `static` directory
    let static_files_service =
        ServeDir::new(STATIC_DIR.as_str()).not_found_service(tower::service_fn(|_| async {
            Ok::<_, std::convert::Infallible>(
                (hyper::StatusCode::NOT_FOUND, "Not Found").into_response(),
            )
        }));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(port: u16, state: AppState) -> Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
