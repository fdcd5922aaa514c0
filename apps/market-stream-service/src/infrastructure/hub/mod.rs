//! Connection Hub
//!
//! Owns the registry of live subscribers. Registration, deregistration,
//! broadcast and count queries are all commands consumed in arrival order by
//! a single control loop, so the registry needs no lock and every broadcast
//! sees exactly the membership produced by the commands before it.
//!
//! # Backpressure
//!
//! Each broadcast is encoded once and offered to every client with a
//! non-blocking enqueue. A client whose queue is full is evicted on the spot:
//! removed from the registry, moved to Closing and cancelled. The control
//! loop never waits on a socket.
//!
//! ```text
//! PriceSource ──► Hub::broadcast_prices ──► [command queue] ──► control loop
//!                                                                 │ encode once
//!                                                 ┌───────────────┼───────────────┐
//!                                                 ▼               ▼               ▼
//!                                            client queue    client queue    client queue
//! ```

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PriceHandler;
use crate::domain::price::PriceSnapshot;
use crate::infrastructure::client::{ClientHandle, ClientId, EnqueueError};
use crate::infrastructure::codec::SnapshotCodec;
use crate::infrastructure::metrics::{self, EvictionReason};

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug)]
enum HubCommand {
    Register(ClientHandle),
    Unregister(ClientId),
    Broadcast(PriceSnapshot),
    ClientCount(oneshot::Sender<usize>),
}

// =============================================================================
// Hub Handle
// =============================================================================

/// Cloneable handle to the hub control loop.
///
/// All methods enqueue a command and return immediately; none of them fail.
/// Once the control loop has stopped, commands are discarded.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Start the control loop.
    ///
    /// The loop runs until `cancel` fires or every `Hub` handle is dropped,
    /// then closes all remaining clients.
    #[must_use]
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = ControlLoop {
            commands: rx,
            clients: HashMap::new(),
            codec: SnapshotCodec::new(),
            cancel,
        };
        let task = tokio::spawn(control.run());
        (Self { commands: tx }, task)
    }

    /// Add a client to the registry, replacing any entry with the same id.
    pub fn register(&self, client: ClientHandle) {
        self.send(HubCommand::Register(client));
    }

    /// Remove a client and close it. Unknown ids are ignored.
    pub fn unregister(&self, id: ClientId) {
        self.send(HubCommand::Unregister(id));
    }

    /// Fan a snapshot out to every registered client.
    pub fn broadcast_prices(&self, snapshot: PriceSnapshot) {
        self.send(HubCommand::Broadcast(snapshot));
    }

    /// Number of registered clients, ordered after every earlier command.
    ///
    /// Returns 0 if the control loop has stopped.
    pub async fn client_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::ClientCount(tx));
        rx.await.unwrap_or(0)
    }

    /// Whether the control loop is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::trace!("Hub stopped, command discarded");
        }
    }
}

impl PriceHandler for Hub {
    fn on_prices(&self, snapshot: &PriceSnapshot) {
        self.broadcast_prices(snapshot.clone());
    }
}

// =============================================================================
// Control Loop
// =============================================================================

struct ControlLoop {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    clients: HashMap<ClientId, ClientHandle>,
    codec: SnapshotCodec,
    cancel: CancellationToken,
}

impl ControlLoop {
    async fn run(mut self) {
        tracing::info!("Hub started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        self.close_all();
        tracing::info!("Hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister(id) => {
                self.remove(id, EvictionReason::Unregistered);
            }
            HubCommand::Broadcast(snapshot) => self.broadcast(&snapshot),
            HubCommand::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let id = client.id();
        let peer = client.peer();
        if let Some(previous) = self.clients.insert(id, client.clone())
            && !previous.same_connection(&client)
        {
            previous.begin_close();
            tracing::debug!(client_id = %id, "Replaced existing registration");
        }
        metrics::set_clients_connected(self.clients.len());
        tracing::info!(client_id = %id, peer = ?peer, clients = self.clients.len(), "Client registered");
    }

    fn remove(&mut self, id: ClientId, reason: EvictionReason) -> bool {
        let Some(client) = self.clients.remove(&id) else {
            return false;
        };
        client.begin_close();
        metrics::record_eviction(reason);
        metrics::set_clients_connected(self.clients.len());
        tracing::info!(
            client_id = %id,
            reason = reason.as_str(),
            clients = self.clients.len(),
            "Client removed"
        );
        true
    }

    fn broadcast(&mut self, snapshot: &PriceSnapshot) {
        if self.clients.is_empty() {
            return;
        }

        let frame = match self.codec.encode(snapshot) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode snapshot");
                return;
            }
        };

        let mut evicted = Vec::new();
        let mut delivered: u64 = 0;
        for (id, client) in &self.clients {
            match client.try_enqueue(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    tracing::warn!(client_id = %id, "Outbound queue full, evicting slow client");
                    evicted.push((*id, EvictionReason::SlowConsumer));
                }
                Err(EnqueueError::Closed) => {
                    evicted.push((*id, EvictionReason::Disconnected));
                }
            }
        }

        for (id, reason) in evicted {
            self.remove(id, reason);
        }

        metrics::record_broadcast(delivered);
        tracing::debug!(
            prices = snapshot.len(),
            delivered,
            clients = self.clients.len(),
            "Snapshot broadcast"
        );
    }

    fn close_all(&mut self) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.remove(id, EvictionReason::Shutdown);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
