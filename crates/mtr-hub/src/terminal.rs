use std::sync::Arc;

use mtr_core::push::ServerEvent;
use mtr_core::wire;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::hub::ClientHub;

const BRIDGE_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalSendError {
    #[error("terminal bridge not connected")]
    NotConnected,
}

struct TerminalPeer {
    identity: String,
    tx: mpsc::Sender<String>,
}

pub struct TerminalLink {
    slot: RwLock<Option<TerminalPeer>>,
}

impl TerminalLink {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    // First writer wins; a second bridge leaves the slot untouched.
    pub async fn latch_if_empty(&self, identity: &str, tx: mpsc::Sender<String>) -> bool {
        let mut slot = self.slot.write().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(TerminalPeer {
            identity: identity.to_string(),
            tx,
        });
        info!(event = "bridge_latched", identity = %identity);
        true
    }

    // Clearing the slot lets a restarted bridge re-latch on its first frame.
    pub async fn release(&self, identity: &str) -> bool {
        let mut slot = self.slot.write().await;
        match slot.as_ref() {
            Some(peer) if peer.identity == identity => {
                *slot = None;
                info!(event = "bridge_released", identity = %identity);
                true
            }
            _ => false,
        }
    }

    // A queue failure on a dying peer is logged and swallowed: delivery
    // is fire-and-forget.
    pub async fn send(&self, command: String) -> Result<(), TerminalSendError> {
        let peer = {
            let slot = self.slot.read().await;
            match slot.as_ref() {
                Some(peer) => (peer.identity.clone(), peer.tx.clone()),
                None => return Err(TerminalSendError::NotConnected),
            }
        };
        if peer.1.send(command).await.is_err() {
            warn!(event = "bridge_send_error", identity = %peer.0);
        }
        Ok(())
    }

    pub async fn latched_identity(&self) -> Option<String> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|peer| peer.identity.clone())
    }
}

impl Default for TerminalLink {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run(listener: TcpListener, terminal: Arc<TerminalLink>, hub: Arc<ClientHub>) {
    let mut conn_counter: u64 = 0;
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "bridge_accept_error", error = %err);
                continue;
            }
        };
        conn_counter += 1;
        let identity = format!("bridge-{conn_counter}");
        info!(event = "bridge_connected", identity = %identity, remote = %remote);
        tokio::spawn(handle_bridge(
            stream,
            identity,
            terminal.clone(),
            hub.clone(),
        ));
    }
}

async fn handle_bridge(
    stream: TcpStream,
    identity: String,
    terminal: Arc<TerminalLink>,
    hub: Arc<ClientHub>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(BRIDGE_BUFFER_SIZE);

    let write_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                return;
            }
            if write_half.write_all(b"\n").await.is_err() {
                return;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(event = "bridge_read_error", identity = %identity, error = %err);
                break;
            }
        };
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }
        on_frame(&terminal, &hub, &identity, &tx, frame).await;
    }

    if terminal.release(&identity).await {
        hub.broadcast(ServerEvent::log("Terminal bridge disconnected."))
            .await;
    }
    info!(event = "bridge_disconnected", identity = %identity);
    drop(tx);
    let _ = write_task.await;
}

// Frames from an unlatched second bridge are still decoded and routed;
// replies keep targeting the latched peer.
async fn on_frame(
    terminal: &TerminalLink,
    hub: &ClientHub,
    identity: &str,
    tx: &mpsc::Sender<String>,
    frame: &str,
) {
    terminal.latch_if_empty(identity, tx.clone()).await;
    match wire::decode_frame(frame) {
        Ok(event) => hub.on_terminal_event(event).await,
        Err(err) => {
            warn!(event = "bridge_frame_invalid", identity = %identity, error = %err);
            hub.broadcast(ServerEvent::log(format!("Error: bad bridge frame: {err}")))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtr_core::push::DataPayload;

    #[tokio::test]
    async fn bad_bridge_frame_broadcasts_one_error_line() {
        let terminal = Arc::new(TerminalLink::new());
        let hub = ClientHub::new(terminal.clone());
        let (_dashboard, mut rx) = hub.register_conn().await;
        let (tx, _bridge_rx) = mpsc::channel(4);

        on_frame(&terminal, &hub, "bridge-1", &tx, "TICK|DATA|EURUSD|abc|1.1").await;

        // The malformed frame still latches its sender.
        assert_eq!(
            terminal.latched_identity().await.as_deref(),
            Some("bridge-1")
        );
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 1);
        match &events[0] {
            ServerEvent::LogMessage(DataPayload { data }) => {
                assert!(data.starts_with("Error: bad bridge frame:"), "got: {data}");
                assert!(data.contains("bid"));
            }
            other => panic!("expected log_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_without_latched_peer_reports_not_connected() {
        let terminal = TerminalLink::new();
        assert_eq!(
            terminal.send("TICK|SUBSCRIBE|EURUSD".to_string()).await,
            Err(TerminalSendError::NotConnected)
        );
    }

    #[tokio::test]
    async fn first_peer_wins_the_latch() {
        let terminal = TerminalLink::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);

        assert!(terminal.latch_if_empty("bridge-1", tx_a).await);
        assert!(!terminal.latch_if_empty("bridge-2", tx_b).await);
        assert_eq!(terminal.latched_identity().await.as_deref(), Some("bridge-1"));

        terminal
            .send("TICK|SUBSCRIBE|EURUSD".to_string())
            .await
            .expect("send");
        assert_eq!(rx_a.recv().await.as_deref(), Some("TICK|SUBSCRIBE|EURUSD"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn release_only_clears_the_latched_identity() {
        let terminal = TerminalLink::new();
        let (tx, _rx) = mpsc::channel(4);
        assert!(terminal.latch_if_empty("bridge-1", tx).await);

        assert!(!terminal.release("bridge-2").await);
        assert_eq!(terminal.latched_identity().await.as_deref(), Some("bridge-1"));

        assert!(terminal.release("bridge-1").await);
        assert!(terminal.latched_identity().await.is_none());

        // A restarted bridge can latch again.
        let (tx_new, _rx_new) = mpsc::channel(4);
        assert!(terminal.latch_if_empty("bridge-3", tx_new).await);
    }

    #[tokio::test]
    async fn send_to_dead_peer_is_swallowed() {
        let terminal = TerminalLink::new();
        let (tx, rx) = mpsc::channel(4);
        assert!(terminal.latch_if_empty("bridge-1", tx).await);
        drop(rx);

        // Still Ok: the slot is latched, delivery is best-effort.
        assert_eq!(terminal.send("ALERT|SET|EURUSD|ABOVE|1.1".to_string()).await, Ok(()));
    }
}
