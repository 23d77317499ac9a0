mod hub;
mod registry;
mod terminal;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use mtr_core::push::ClientEvent;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::hub::ClientHub;
use crate::terminal::TerminalLink;

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    bridge_addr: String,
    debug: bool,
}

#[derive(Parser, Debug)]
#[command(name = "mtr-hub")]
#[command(about = "Relay hub between the trading-terminal bridge and web front-ends")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    bridge_addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);

    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    let bridge_addr: SocketAddr = match config.bridge_addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.bridge_addr);
            return;
        }
    };

    let terminal = Arc::new(TerminalLink::new());
    let hub = Arc::new(ClientHub::new(terminal.clone()));

    // The bridge rendezvous endpoint. Failure to bind is fatal.
    let bridge_listener = match tokio::net::TcpListener::bind(bridge_addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "bridge_bind_error", error = %err, addr = %config.bridge_addr);
            return;
        }
    };
    tokio::spawn(terminal::run(bridge_listener, terminal, hub.clone()));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_bind_error", error = %err, addr = %config.addr);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        bridge_addr = %config.bridge_addr
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<ClientHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<ClientHub>, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (client, mut rx) = hub.register_conn().await;

    let writer_conn_id = client.conn_id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "serialize_error", conn_id = %writer_conn_id, error = %err);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    });

    hub.on_connect(&client).await;

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(event = "non_utf8_frame", conn_id = %client.conn_id);
                    continue;
                }
            },
            Message::Close(_) => {
                debug!(event = "client_close", conn_id = %client.conn_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "event_invalid", conn_id = %client.conn_id, error = %err);
                continue;
            }
        };
        hub.on_event(&client, event).await;
    }

    hub.remove_conn(&client).await;
    drop(client);
    let _ = write_task.await;
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_setting(&args.addr, "MTR_HUB_ADDR", "0.0.0.0:5001"),
        bridge_addr: resolve_setting(&args.bridge_addr, "MTR_BRIDGE_ADDR", "0.0.0.0:5555"),
        debug: args.debug || env_true("MTR_HUB_DEBUG"),
    }
}

fn resolve_setting(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) {
    let level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
