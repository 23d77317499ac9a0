use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mtr_core::push::{ClientEvent, DataPayload, ServerEvent, TickPayload};
use mtr_core::wire::{self, Command, InboundEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::registry::AgentRegistry;
use crate::terminal::TerminalLink;

// A front-end that stops draining loses events once this fills.
const CLIENT_BUFFER_SIZE: usize = 256;

pub struct Client {
    pub conn_id: String,
    sender: mpsc::Sender<ServerEvent>,
}

impl Client {
    // try_send so one stalled connection can never block fan-out to the
    // rest; a full buffer drops the event.
    fn send(&self, event: ServerEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

pub struct ClientHub {
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    registry: RwLock<AgentRegistry>,
    terminal: Arc<TerminalLink>,
}

impl ClientHub {
    pub fn new(terminal: Arc<TerminalLink>) -> Self {
        Self {
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            registry: RwLock::new(AgentRegistry::new()),
            terminal,
        }
    }

    pub async fn register_conn(&self) -> (Arc<Client>, mpsc::Receiver<ServerEvent>) {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER_SIZE);
        let client = Arc::new(Client {
            conn_id: format!("conn-{id}"),
            sender: tx,
        });
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        info!(event = "client_connected", conn_id = %client.conn_id);
        (client, rx)
    }

    // Snapshot goes to the new connection only, never broadcast.
    pub async fn on_connect(&self, client: &Client) {
        let snapshot = self.registry.read().await.snapshot();
        if !client.send(ServerEvent::UpdateAgents(snapshot)) {
            warn!(event = "snapshot_send_error", conn_id = %client.conn_id);
        }
    }

    pub async fn remove_conn(&self, client: &Client) {
        self.clients.write().await.remove(&client.conn_id);
        let removed = self.registry.write().await.remove(&client.conn_id);
        if let Some(record) = &removed {
            info!(
                event = "agent_disconnected",
                conn_id = %client.conn_id,
                agent = %record.name
            );
        } else {
            info!(event = "client_disconnected", conn_id = %client.conn_id);
        }
        self.broadcast_snapshot().await;
    }

    pub async fn on_event(&self, client: &Client, event: ClientEvent) {
        match event {
            ClientEvent::Register(payload) => {
                info!(
                    event = "agent_registered",
                    conn_id = %client.conn_id,
                    agent = %payload.name
                );
                self.registry
                    .write()
                    .await
                    .register(&client.conn_id, payload.name);
                self.broadcast_snapshot().await;
            }
            ClientEvent::ReportProfiles(payload) => {
                let known = self
                    .registry
                    .write()
                    .await
                    .report_profiles(&client.conn_id, payload.profiles);
                if !known {
                    warn!(
                        event = "profiles_from_unregistered",
                        conn_id = %client.conn_id,
                        agent = %payload.agent
                    );
                    return;
                }
                info!(event = "profiles_reported", agent = %payload.agent);
                self.broadcast_snapshot().await;
            }
            ClientEvent::TradeCommand(payload) => {
                self.send_command(Command::TradeOrder {
                    order_type: payload.order_type,
                    symbol: payload.symbol,
                    volume: payload.volume,
                    sl: payload.sl,
                    tp: payload.tp,
                })
                .await;
            }
            ClientEvent::AlertSet(payload) => {
                self.send_command(Command::AlertRule {
                    symbol: payload.symbol,
                    condition: payload.condition,
                    price: payload.price,
                })
                .await;
            }
            ClientEvent::SubscribeSymbol(payload) => {
                self.send_command(Command::Subscribe {
                    symbol: payload.symbol,
                })
                .await;
            }
            ClientEvent::StartProfileOnAgent(payload) => {
                let target = self.registry.read().await.find_by_name(&payload.agent);
                match target {
                    Some(conn_id) => {
                        let delivered = self
                            .send_to(&conn_id, ServerEvent::StartProfile(payload.clone()))
                            .await;
                        if !delivered {
                            warn!(event = "start_profile_send_error", conn_id = %conn_id);
                        }
                        self.broadcast(ServerEvent::log(format!(
                            "Command sent to {}: start profile {}",
                            payload.agent, payload.profile
                        )))
                        .await;
                    }
                    None => {
                        warn!(event = "agent_not_found", agent = %payload.agent);
                        self.broadcast(ServerEvent::log(format!(
                            "Error: agent {} not found or disconnected.",
                            payload.agent
                        )))
                        .await;
                    }
                }
            }
            ClientEvent::AgentLog(payload) => {
                self.broadcast(ServerEvent::log(format!(
                    "[Agent: {}] {}",
                    payload.agent, payload.data
                )))
                .await;
            }
        }
    }

    pub async fn on_terminal_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Tick { symbol, bid, ask } => {
                self.broadcast(ServerEvent::TickData(TickPayload { symbol, bid, ask }))
                    .await;
            }
            InboundEvent::Alert { raw } => {
                self.broadcast(ServerEvent::PriceAlert(DataPayload { data: raw }))
                    .await;
            }
            InboundEvent::Log { raw } => {
                self.broadcast(ServerEvent::log(raw)).await;
            }
        }
    }

    pub async fn broadcast(&self, event: ServerEvent) {
        let clients: Vec<Arc<Client>> = self.clients.read().await.values().cloned().collect();
        for client in clients {
            if !client.send(event.clone()) {
                warn!(event = "send_error", conn_id = %client.conn_id);
            }
        }
    }

    async fn send_to(&self, conn_id: &str, event: ServerEvent) -> bool {
        let target = self.clients.read().await.get(conn_id).cloned();
        match target {
            Some(client) => client.send(event),
            None => false,
        }
    }

    async fn broadcast_snapshot(&self) {
        let snapshot = self.registry.read().await.snapshot();
        self.broadcast(ServerEvent::UpdateAgents(snapshot)).await;
    }

    // With no bridge latched the command is dropped and a single error
    // line broadcast instead; no queueing, no retry.
    async fn send_command(&self, command: Command) {
        let encoded = wire::encode_command(&command);
        match self.terminal.send(encoded.clone()).await {
            Ok(()) => {
                self.broadcast(ServerEvent::log(format!("Sent to terminal: {encoded}")))
                    .await;
            }
            Err(err) => {
                warn!(event = "command_dropped", error = %err);
                self.broadcast(ServerEvent::log(
                    "Error: terminal bridge not connected.".to_string(),
                ))
                .await;
            }
        }
    }
}
