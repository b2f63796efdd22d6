//! Peer network - websocket links between arbitrators
//!
//! Every arbiter listens for peers and dials the configured arbitrators whose
//! key sorts above its own, so each pair ends up with exactly one link. Both
//! ends send a `Version` frame first; a peer that does not answer within the
//! handshake timeout, speaks another network magic or is not a configured
//! arbitrator is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cross_chain_types::PublicKey;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};

use crate::router::MessageRouter;
use crate::types::{PeerMessage, VersionMessage, WireMessage};

/// Outbound side of the peer network
pub trait Broadcaster: Send + Sync {
    /// Send to every connected peer
    fn broadcast(&self, message: PeerMessage);
}

/// A configured arbitrator and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub public_key: PublicKey,
    /// host:port of the peer's listener
    pub net_address: String,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address to listen on, e.g. 0.0.0.0:20338
    pub listen_addr: String,
    pub version: u32,
    pub handshake_timeout: Duration,
    pub peers: Vec<PeerAddress>,
}

/// Frames queued per peer; broadcasts to a peer with a full queue are dropped
const PEER_SEND_QUEUE: usize = 256;

struct PeerHandle {
    sender: mpsc::Sender<Vec<u8>>,
    connection_id: u64,
}

pub struct PeerNetwork {
    config: NetworkConfig,
    local_key: PublicKey,
    router: Arc<MessageRouter>,
    peers: DashMap<PublicKey, PeerHandle>,
    dialing: DashSet<PublicKey>,
    next_connection_id: AtomicU64,
    listen_port: AtomicU16,
}

impl PeerNetwork {
    pub fn new(config: NetworkConfig, local_key: PublicKey, router: Arc<MessageRouter>) -> Self {
        Self {
            config,
            local_key,
            router,
            peers: DashMap::new(),
            dialing: DashSet::new(),
            next_connection_id: AtomicU64::new(0),
            listen_port: AtomicU16::new(0),
        }
    }

    /// Start accepting peer connections; returns the bound address
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        self.listen_port.store(local_addr.port(), Ordering::Release);
        tracing::info!("Peer network listening on {}", local_addr);

        let network = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Inbound connection from {}", peer_addr);
                        let network = network.clone();
                        tokio::spawn(async move {
                            let result = match accept_async(stream).await {
                                Ok(ws) => network.run_connection(ws).await,
                                Err(e) => Err(e.into()),
                            };
                            if let Err(e) = result {
                                tracing::warn!("Connection from {} closed: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Dial configured arbitrators that are not connected yet.
    ///
    /// Called from the reconnect schedule; failed dials wait for the next tick.
    pub fn connect_peers(self: &Arc<Self>) {
        for peer in &self.config.peers {
            if peer.public_key <= self.local_key
                || self.peers.contains_key(&peer.public_key)
                || !self.dialing.insert(peer.public_key)
            {
                continue;
            }

            let network = self.clone();
            let peer = peer.clone();
            tokio::spawn(async move {
                let url = format!("ws://{}", peer.net_address);
                match connect_async(url.as_str()).await {
                    Ok((ws, _)) => {
                        network.dialing.remove(&peer.public_key);
                        if let Err(e) = network.run_connection(ws).await {
                            tracing::warn!("Connection to {} closed: {}", peer.net_address, e);
                        }
                    }
                    Err(e) => {
                        network.dialing.remove(&peer.public_key);
                        tracing::debug!("Dial {} failed: {}", peer.net_address, e);
                    }
                }
            });
        }
    }

    pub fn connected_peers(&self) -> Vec<PublicKey> {
        let mut peers: Vec<PublicKey> = self.peers.iter().map(|p| *p.key()).collect();
        peers.sort();
        peers
    }

    fn is_configured(&self, key: &PublicKey) -> bool {
        self.config.peers.iter().any(|p| &p.public_key == key)
    }

    fn version_message(&self) -> VersionMessage {
        VersionMessage {
            version: self.config.version,
            magic: self.router.magic(),
            public_key: self.local_key,
            port: self.listen_port.load(Ordering::Acquire),
        }
    }

    async fn run_connection<S>(self: Arc<Self>, ws: WebSocketStream<S>) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sender, mut ws_receiver) = ws.split();

        let hello = WireMessage::Version(self.version_message());
        ws_sender.send(Message::Binary(hello.to_bytes())).await?;

        let remote = tokio::time::timeout(self.config.handshake_timeout, read_version(&mut ws_receiver))
            .await
            .map_err(|_| anyhow::anyhow!("handshake timed out"))??;
        self.router.validate_version(&remote)?;
        if remote.public_key == self.local_key {
            anyhow::bail!("connected to self");
        }
        if !self.is_configured(&remote.public_key) {
            anyhow::bail!("{} is not a configured arbitrator", remote.public_key);
        }

        let peer_key = remote.public_key;
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(PEER_SEND_QUEUE);
        match self.peers.entry(peer_key) {
            Entry::Occupied(_) => anyhow::bail!("already connected to {}", peer_key.short()),
            Entry::Vacant(slot) => {
                slot.insert(PeerHandle {
                    sender: tx,
                    connection_id,
                });
            }
        }
        tracing::info!(
            "Peer {} connected (version {}, port {})",
            peer_key.short(),
            remote.version,
            remote.port
        );

        let send_task = tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if ws_sender.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => self.handle_frame(&peer_key, &data),
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!("WebSocket error from {}: {}", peer_key.short(), e);
                    break;
                }
                _ => {}
            }
        }

        send_task.abort();
        self.peers
            .remove_if(&peer_key, |_, handle| handle.connection_id == connection_id);
        tracing::info!("Peer {} disconnected", peer_key.short());
        Ok(())
    }

    fn handle_frame(&self, peer: &PublicKey, data: &[u8]) {
        let frame = match WireMessage::from_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Undecodable frame from {}: {}", peer.short(), e);
                return;
            }
        };

        match frame {
            WireMessage::Version(_) => {
                tracing::debug!("Ignoring repeated version from {}", peer.short());
            }
            WireMessage::Message { command, payload } => match self.router.make_message(&command) {
                Ok(mut message) => {
                    message.payload = payload;
                    self.router.dispatch(peer, &message);
                }
                Err(e) => tracing::warn!("Dropping message from {}: {}", peer.short(), e),
            },
        }
    }
}

async fn read_version<R>(receiver: &mut R) -> anyhow::Result<VersionMessage>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = receiver.next().await {
        match msg? {
            Message::Binary(data) => match WireMessage::from_bytes(&data)? {
                WireMessage::Version(version) => return Ok(version),
                WireMessage::Message { command, .. } => {
                    anyhow::bail!("expected version, got {}", command)
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    anyhow::bail!("connection closed during handshake")
}

impl Broadcaster for PeerNetwork {
    fn broadcast(&self, message: PeerMessage) {
        let frame = WireMessage::Message {
            command: message.command.as_str().to_string(),
            payload: message.payload,
        }
        .to_bytes();

        let mut sent = 0;
        for peer in self.peers.iter() {
            match peer.sender.try_send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => tracing::warn!(
                    "Send queue of {} is full, dropping {}",
                    peer.key().short(),
                    message.command
                ),
                Err(TrySendError::Closed(_)) => {}
            }
        }
        tracing::debug!("Broadcast {} to {} peers", message.command, sent);
    }
}
