use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use uuid::Uuid;

mod config;
mod connections;
mod coordinator;
mod error;
mod protocol;
mod state;
mod upload;

use config::Config;
use connections::Connections;
use coordinator::{Command, Coordinator};
use protocol::{ConnectionId, RoomCreated, ServerEvent};
use upload::{MediaStore, MEDIA_ROUTE};

const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    commands: mpsc::UnboundedSender<Command>,
    connections: Connections,
    media_store: MediaStore,
    unclaimed_room_ttl: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cowatch_server=debug,tower_http=info,info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let connections = Connections::new();
    let (commands, command_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(connections.clone(), config.enforce_creator_sync);
    tokio::spawn(coordinator.run(command_rx));

    let app_state = AppState {
        commands,
        connections,
        media_store: MediaStore::new(config.upload_dir.clone()),
        unclaimed_room_ttl: config.unclaimed_room_ttl,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(welcome))
        .route("/healthz", get(health_check))
        .route("/create-room", post(create_room))
        .route(
            "/upload",
            post(upload::upload_media).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/ws", get(ws_endpoint))
        .nest_service(MEDIA_ROUTE, ServeDir::new(app_state.media_store.dir()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(
        "Cowatch Server listening on {} (uploads in {:?})",
        listener.local_addr()?,
        config.upload_dir
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn welcome() -> &'static str {
    "Welcome to the Cowatch sync server!"
}

async fn health_check() -> &'static str {
    "ok"
}

async fn create_room(State(state): State<AppState>) -> Result<Json<RoomCreated>, StatusCode> {
    let (reply, room) = oneshot::channel();
    state
        .commands
        .send(Command::CreateRoom { reply })
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let room_id = room.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let commands = state.commands.clone();
    let ttl = state.unclaimed_room_ttl;
    let expiring = room_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let _ = commands.send(Command::ExpireIfUnclaimed { room_id: expiring });
    });

    Ok(Json(RoomCreated { room_id }))
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    state.connections.register(connection_id, tx.clone());
    tracing::info!(
        "Client {} connected ({} open)",
        connection_id,
        state.connections.len()
    );

    // Spawn task to send events to client
    let send_task = tokio::spawn(pump_events(rx, ws_sender));

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(AxumWsMessage::Text(text)) => {
                if let Err(e) = forward_event(&text, connection_id, &state) {
                    tracing::warn!("Rejected message from {}: {}", connection_id, e);
                    let _ = tx.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            Ok(AxumWsMessage::Close(_)) => {
                tracing::info!("Client {} closing connection", connection_id);
                break;
            }
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup: once both senders are gone the send task drains what is queued and ends.
    let _ = state.commands.send(Command::Disconnect {
        connection: connection_id,
    });
    state.connections.unregister(connection_id);
    drop(tx);
    let abort = send_task.abort_handle();
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, send_task).await.is_err() {
        tracing::debug!("Client {} did not drain its queue in time", connection_id);
        abort.abort();
    }
    tracing::info!("Client {} disconnected", connection_id);
}

/// Writes queued events to the socket until every sender is dropped.
async fn pump_events<S>(mut rx: mpsc::UnboundedReceiver<ServerEvent>, mut sink: S)
where
    S: Sink<AxumWsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(event) = rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize event: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(AxumWsMessage::Text(json)).await {
            tracing::error!("Failed to send event: {}", e);
            break;
        }
    }
}

fn forward_event(text: &str, connection: ConnectionId, state: &AppState) -> anyhow::Result<()> {
    let event = protocol::decode_client_event(text)?;
    state
        .commands
        .send(Command::Client { connection, event })
        .map_err(|_| anyhow::anyhow!("coordinator is not running"))?;
    Ok(())
}
