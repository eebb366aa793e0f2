//! `RoomActor` - per-room actor that owns all room state.
//!
//! Each `RoomActor`:
//! - Owns one room: peer map, role/permission flags, the router capability,
//!   each session's transports and owned producer/consumer sets
//! - Serializes every mutation of that room, so concurrent joins, leaves,
//!   promotions and stream operations cannot interleave mid-mutation
//! - Broadcasts membership snapshots and stream lifecycle events through
//!   the peers' connection actors
//!
//! # Roles
//!
//! The first peer to join while the peer set is empty becomes host with
//! publish permission. Later joiners start as viewers. The host may promote
//! viewers (permission only ever grows) and may force-stop any producer in
//! the room.
//!
//! # Reclaim
//!
//! Producer/consumer records are removed by whichever path fires first:
//! explicit close, forced stop, owner disconnect, or an engine-side closure
//! observed through the handle's cancellation token. Every removal path is
//! idempotent.

use crate::engine::{
    ConsumerHandle, MediaEngine, MediaKind, ProducerHandle, RouterHandle, TransportHandle,
};
use crate::errors::RcError;
use crate::registry::{ProducerEntry, ProducerRegistry};
use crate::signaling::{PeerInfo, ServerEvent};

use super::connection::ConnectionActorHandle;
use super::messages::{ConsumeResult, JoinResult, RoomMessage, RoomSnapshot, TransportDirection};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Join the room.
    pub async fn join(
        &self,
        connection_id: String,
        display_name: String,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                connection_id,
                display_name,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Create the session's transport for the given direction.
    pub async fn create_transport(
        &self,
        connection_id: String,
        direction: TransportDirection,
    ) -> Result<Value, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::CreateTransport {
                connection_id,
                direction,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Finish transport setup with client security parameters.
    pub async fn connect_transport(
        &self,
        connection_id: String,
        direction: TransportDirection,
        security: Value,
    ) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::ConnectTransport {
                connection_id,
                direction,
                security,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Publish a stream.
    pub async fn produce(
        &self,
        connection_id: String,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
    ) -> Result<String, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Produce {
                connection_id,
                kind,
                media_parameters,
                app_data,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Subscribe to an existing producer.
    pub async fn consume(
        &self,
        connection_id: String,
        producer_id: String,
        capabilities: Value,
    ) -> Result<ConsumeResult, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Consume {
                connection_id,
                producer_id,
                capabilities,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Unpause a consumer. Unknown or foreign ids are ignored.
    pub async fn resume(&self, connection_id: String, consumer_id: String) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Resume {
                connection_id,
                consumer_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Close an owned producer (fire-and-acknowledge).
    pub async fn close_producer(
        &self,
        connection_id: String,
        producer_id: String,
    ) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::CloseProducer {
                connection_id,
                producer_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Grant publish permission to another peer (host only, silent otherwise).
    pub async fn promote_peer(
        &self,
        connection_id: String,
        target_peer_id: String,
    ) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::PromotePeer {
                connection_id,
                target_peer_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop another peer's producer (host only, silent otherwise).
    pub async fn force_stop_producer(
        &self,
        connection_id: String,
        producer_id: String,
    ) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::ForceStopProducer {
                connection_id,
                producer_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Reclaim everything a terminated connection owned. Idempotent.
    pub async fn disconnect(&self, connection_id: String) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Disconnect {
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Get current room state.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetSnapshot { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One session's consumer record.
struct PeerConsumer {
    /// The producer this consumer mirrors.
    producer_id: String,
    /// Engine handle.
    handle: Arc<dyn ConsumerHandle>,
}

/// Per-session state within the room.
struct Peer {
    /// Connection identifier.
    connection_id: String,
    /// Display name (user-supplied, untrusted).
    display_name: String,
    /// Host authority, fixed at join time.
    is_host: bool,
    /// Publish permission. Only ever grows.
    can_produce: bool,
    /// Monotonic join order, used for participant list determinism.
    join_seq: u64,
    /// Push channel to this peer's client.
    connection: ConnectionActorHandle,
    /// Transport carrying published streams, created once.
    producer_transport: Option<Arc<dyn TransportHandle>>,
    /// Transport carrying subscriptions, created once.
    consumer_transport: Option<Arc<dyn TransportHandle>>,
    /// Producers owned by this session.
    producers: HashMap<String, Arc<dyn ProducerHandle>>,
    /// Consumers owned by this session.
    consumers: HashMap<String, PeerConsumer>,
}

impl Peer {
    fn to_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.connection_id.clone(),
            name: self.display_name.clone(),
            is_host: self.is_host,
            can_produce: self.can_produce,
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Sender into our own mailbox, for reclaim watchers.
    self_sender: mpsc::Sender<RoomMessage>,
    /// Cancellation token (child of the directory's token).
    cancel_token: CancellationToken,
    /// Media engine backend.
    engine: Arc<dyn MediaEngine>,
    /// Process-wide producer registry.
    registry: Arc<ProducerRegistry>,
    /// Router capability, acquired lazily on first join.
    router: Option<Arc<dyn RouterHandle>>,
    /// Peers by connection id.
    peers: HashMap<String, Peer>,
    /// Next join sequence number.
    next_join_seq: u64,
    /// Maximum peers admitted to this room.
    max_peers: u32,
    /// Room creation timestamp.
    created_at: i64,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        engine: Arc<dyn MediaEngine>,
        registry: Arc<ProducerRegistry>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        max_peers: u32,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            engine,
            registry,
            router: None,
            peers: HashMap::new(),
            next_join_seq: 0,
            max_peers,
            created_at: chrono::Utc::now().timestamp(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection_id,
                display_name,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, display_name, connection).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateTransport {
                connection_id,
                direction,
                respond_to,
            } => {
                let result = self.handle_create_transport(&connection_id, direction).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                connection_id,
                direction,
                security,
                respond_to,
            } => {
                let result = self
                    .handle_connect_transport(&connection_id, direction, security)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                connection_id,
                kind,
                media_parameters,
                app_data,
                respond_to,
            } => {
                let result = self
                    .handle_produce(&connection_id, kind, media_parameters, app_data)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Consume {
                connection_id,
                producer_id,
                capabilities,
                respond_to,
            } => {
                let result = self
                    .handle_consume(&connection_id, &producer_id, capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Resume {
                connection_id,
                consumer_id,
                respond_to,
            } => {
                self.handle_resume(&connection_id, &consumer_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::CloseProducer {
                connection_id,
                producer_id,
                respond_to,
            } => {
                self.handle_close_producer(&connection_id, &producer_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::PromotePeer {
                connection_id,
                target_peer_id,
                respond_to,
            } => {
                self.handle_promote(&connection_id, &target_peer_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::ForceStopProducer {
                connection_id,
                producer_id,
                respond_to,
            } => {
                self.handle_force_stop(&connection_id, &producer_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::Disconnect {
                connection_id,
                respond_to,
            } => {
                self.handle_disconnect(&connection_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::ProducerVanished { producer_id } => {
                self.handle_producer_vanished(&producer_id);
            }

            RoomMessage::ConsumerVanished {
                connection_id,
                consumer_id,
            } => {
                self.handle_consumer_vanished(&connection_id, &consumer_id).await;
            }

            RoomMessage::GetSnapshot { respond_to } => {
                let snapshot = self.snapshot();
                let _ = respond_to.send(snapshot);
            }
        }
    }

    /// Handle a connection joining the room.
    ///
    /// The first peer to join an empty room becomes host with publish
    /// permission; later joiners start as viewers.
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    async fn handle_join(
        &mut self,
        connection_id: String,
        display_name: String,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, RcError> {
        if self.peers.contains_key(&connection_id) {
            return Err(RcError::AlreadyJoined);
        }

        if self.peers.len() >= self.max_peers as usize {
            return Err(RcError::RoomAtCapacity(self.room_id.clone()));
        }

        // Acquire the router capability lazily, exactly once per room
        if self.router.is_none() {
            let router = self.engine.create_router().await?;
            debug!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                router_id = %router.id(),
                "Router capability acquired"
            );
            self.router = Some(router);
        }
        let router = self
            .router
            .clone()
            .ok_or_else(|| RcError::Internal("router missing after creation".to_string()))?;

        // Role assignment: host iff the peer set was empty at this moment
        let is_first = self.peers.is_empty();
        let peer = Peer {
            connection_id: connection_id.clone(),
            display_name,
            is_host: is_first,
            can_produce: is_first,
            join_seq: self.next_join_seq,
            connection,
            producer_transport: None,
            consumer_transport: None,
            producers: HashMap::new(),
            consumers: HashMap::new(),
        };
        self.next_join_seq += 1;

        let is_host = peer.is_host;
        let can_produce = peer.can_produce;
        self.peers.insert(connection_id.clone(), peer);

        let existing_producers = self.registry.producers_in_room(&self.room_id, &connection_id);

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            is_host = is_host,
            total_peers = self.peers.len(),
            "Peer joined"
        );

        self.broadcast_participants().await;

        Ok(JoinResult {
            routing_capabilities: router.capabilities(),
            existing_producers,
            is_host,
            can_produce,
        })
    }

    /// Create one of the session's two transports.
    ///
    /// Transports are created once; a repeated request returns the
    /// connection parameters of the existing transport.
    async fn handle_create_transport(
        &mut self,
        connection_id: &str,
        direction: TransportDirection,
    ) -> Result<Value, RcError> {
        let router = match self.peers.get(connection_id) {
            None => return Err(RcError::NotJoined),
            Some(peer) => {
                let slot = match direction {
                    TransportDirection::Producer => &peer.producer_transport,
                    TransportDirection::Consumer => &peer.consumer_transport,
                };
                if let Some(existing) = slot {
                    return Ok(existing.connect_params());
                }
                self.router
                    .clone()
                    .ok_or_else(|| RcError::Internal("router missing for joined room".to_string()))?
            }
        };

        let transport = router.create_transport().await?;
        let params = transport.connect_params();

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            direction = direction.as_str(),
            transport_id = %transport.id(),
            "Transport created"
        );

        if let Some(peer) = self.peers.get_mut(connection_id) {
            match direction {
                TransportDirection::Producer => peer.producer_transport = Some(transport),
                TransportDirection::Consumer => peer.consumer_transport = Some(transport),
            }
        }

        Ok(params)
    }

    /// Finish transport setup with client security parameters.
    async fn handle_connect_transport(
        &mut self,
        connection_id: &str,
        direction: TransportDirection,
        security: Value,
    ) -> Result<(), RcError> {
        let transport = match self.peers.get(connection_id) {
            None => return Err(RcError::NotJoined),
            Some(peer) => match direction {
                TransportDirection::Producer => peer.producer_transport.clone(),
                TransportDirection::Consumer => peer.consumer_transport.clone(),
            },
        };

        let transport = transport.ok_or(RcError::TransportNotReady)?;
        transport.connect(security).await?;
        Ok(())
    }

    /// Publish a stream on the session's producer transport.
    #[instrument(skip_all, fields(room_id = %self.room_id, connection_id = %connection_id))]
    async fn handle_produce(
        &mut self,
        connection_id: &str,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
    ) -> Result<String, RcError> {
        let (can_produce, transport) = match self.peers.get(connection_id) {
            None => return Err(RcError::NotJoined),
            Some(peer) => (peer.can_produce, peer.producer_transport.clone()),
        };

        if !can_produce {
            return Err(RcError::PermissionDenied(
                "Publish permission required".to_string(),
            ));
        }
        let transport = transport.ok_or(RcError::TransportNotReady)?;

        let producer = transport
            .produce(kind, media_parameters, app_data.clone())
            .await?;
        let producer_id = producer.id().to_string();

        if let Some(peer) = self.peers.get_mut(connection_id) {
            peer.producers
                .insert(producer_id.clone(), Arc::clone(&producer));
        }
        self.registry.insert(ProducerEntry {
            producer_id: producer_id.clone(),
            session_id: connection_id.to_string(),
            room_id: self.room_id.clone(),
            app_data,
            handle: Arc::clone(&producer),
        });
        self.spawn_producer_watcher(producer_id.clone(), producer.closed());
        self.metrics.producer_created();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            producer_id = %producer_id,
            kind = %kind,
            "Producer published"
        );

        // Announce the new stream to everyone except the publisher
        self.push_to_others(
            connection_id,
            ServerEvent::NewProducer {
                producer_id: producer_id.clone(),
            },
        )
        .await;

        Ok(producer_id)
    }

    /// Subscribe to a producer on the session's consumer transport.
    ///
    /// The consumer is created paused; the client resumes it after wiring
    /// up playback, so no media arrives before it can be rendered.
    #[instrument(skip_all, fields(room_id = %self.room_id, connection_id = %connection_id))]
    async fn handle_consume(
        &mut self,
        connection_id: &str,
        producer_id: &str,
        capabilities: Value,
    ) -> Result<ConsumeResult, RcError> {
        let transport = match self.peers.get(connection_id) {
            None => return Err(RcError::NotJoined),
            Some(peer) => peer.consumer_transport.clone(),
        };
        let transport = transport.ok_or(RcError::TransportNotReady)?;

        let entry = self
            .registry
            .get(producer_id)
            .filter(|e| e.room_id == self.room_id)
            .ok_or_else(|| RcError::ProducerNotFound(producer_id.to_string()))?;

        let router = self
            .router
            .clone()
            .ok_or_else(|| RcError::Internal("router missing for joined room".to_string()))?;
        if !router.can_consume(producer_id, &capabilities).await {
            return Err(RcError::IncompatibleCapabilities);
        }

        let consumer = transport.consume(producer_id, capabilities).await?;
        let consumer_id = consumer.id().to_string();

        if let Some(peer) = self.peers.get_mut(connection_id) {
            peer.consumers.insert(
                consumer_id.clone(),
                PeerConsumer {
                    producer_id: producer_id.to_string(),
                    handle: Arc::clone(&consumer),
                },
            );
        }
        self.spawn_consumer_watcher(
            connection_id.to_string(),
            consumer_id.clone(),
            consumer.closed(),
        );
        self.metrics.consumer_created();

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            producer_id = %producer_id,
            consumer_id = %consumer_id,
            "Consumer created (paused)"
        );

        Ok(ConsumeResult {
            consumer_id,
            producer_id: producer_id.to_string(),
            kind: consumer.kind(),
            media_parameters: consumer.media_parameters(),
            app_data: entry.app_data,
        })
    }

    /// Unpause a consumer. Unknown or foreign ids are ignored.
    async fn handle_resume(&mut self, connection_id: &str, consumer_id: &str) {
        let handle = self
            .peers
            .get(connection_id)
            .and_then(|peer| peer.consumers.get(consumer_id))
            .map(|consumer| Arc::clone(&consumer.handle));

        if let Some(handle) = handle {
            if let Err(e) = handle.resume().await {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    consumer_id = %consumer_id,
                    error = %e,
                    "Consumer resume failed"
                );
            }
        }
    }

    /// Close an owned producer. Silent unless the caller owns it.
    async fn handle_close_producer(&mut self, connection_id: &str, producer_id: &str) {
        let owned = self
            .registry
            .get(producer_id)
            .is_some_and(|e| e.session_id == connection_id && e.room_id == self.room_id);
        if !owned {
            return;
        }

        self.remove_producer(producer_id, connection_id).await;

        // Everyone except the closing publisher tears down their mirror
        self.push_to_others(
            connection_id,
            ServerEvent::ProducerClosed {
                producer_id: producer_id.to_string(),
            },
        )
        .await;
    }

    /// Host-forced producer stop. Silent unless the caller is the host and
    /// the producer lives in this room.
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    async fn handle_force_stop(&mut self, connection_id: &str, producer_id: &str) {
        let is_host = self
            .peers
            .get(connection_id)
            .map(|p| p.is_host)
            .unwrap_or(false);
        if !is_host {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Non-host attempted forced stop"
            );
            return;
        }

        let Some(entry) = self
            .registry
            .get(producer_id)
            .filter(|e| e.room_id == self.room_id)
        else {
            return;
        };

        self.remove_producer(producer_id, &entry.session_id).await;

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            producer_id = %producer_id,
            owner = %entry.session_id,
            stopped_by = %connection_id,
            "Producer force-stopped by host"
        );

        // Owner-direct notification so its client can update publish state
        self.push_to(
            &entry.session_id,
            ServerEvent::ProducerForcedStop {
                producer_id: producer_id.to_string(),
            },
        )
        .await;

        // Room-wide broadcast so every consumer tears down its mirror
        self.push_to_all(ServerEvent::ProducerClosed {
            producer_id: producer_id.to_string(),
        })
        .await;
    }

    /// Grant publish permission. Silent unless the caller is the host and
    /// the target is in this room.
    async fn handle_promote(&mut self, connection_id: &str, target_peer_id: &str) {
        let is_host = self
            .peers
            .get(connection_id)
            .map(|p| p.is_host)
            .unwrap_or(false);
        if !is_host {
            return;
        }

        let Some(target) = self.peers.get_mut(target_peer_id) else {
            return;
        };

        // Monotone: permission only ever grows, there is no revoke path
        target.can_produce = true;

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            target = %target_peer_id,
            promoted_by = %connection_id,
            "Publish permission granted"
        );

        self.push_to(
            target_peer_id,
            ServerEvent::PermissionGranted { can_produce: true },
        )
        .await;

        self.broadcast_participants().await;
    }

    /// Reclaim everything a terminated connection owned, in order:
    /// producers (with per-producer broadcasts), consumers, transports,
    /// then the membership slot and a final participants broadcast.
    /// Invoking this twice for the same connection is a no-op.
    #[instrument(skip_all, fields(room_id = %self.room_id, connection_id = %connection_id))]
    async fn handle_disconnect(&mut self, connection_id: &str) {
        let Some(peer) = self.peers.remove(connection_id) else {
            return;
        };

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            producers = peer.producers.len(),
            consumers = peer.consumers.len(),
            "Peer disconnected, reclaiming session state"
        );

        // Producers: deregister, close, and announce each to the room
        for (producer_id, handle) in peer.producers {
            let _ = self.registry.remove(&producer_id);
            self.metrics.producer_closed();
            if let Err(e) = handle.close().await {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    error = %e,
                    "Engine failed to close producer during disconnect cleanup"
                );
            }
            self.push_to_all(ServerEvent::ProducerClosed { producer_id }).await;
        }

        // Consumers: close quietly, only this session cared about them
        for (consumer_id, consumer) in peer.consumers {
            self.metrics.consumer_closed();
            if let Err(e) = consumer.handle.close().await {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    consumer_id = %consumer_id,
                    error = %e,
                    "Engine failed to close consumer during disconnect cleanup"
                );
            }
        }

        // Transports
        for transport in [peer.producer_transport, peer.consumer_transport]
            .into_iter()
            .flatten()
        {
            if let Err(e) = transport.close().await {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    transport_id = %transport.id(),
                    error = %e,
                    "Engine failed to close transport during disconnect cleanup"
                );
            }
        }

        self.broadcast_participants().await;
    }

    /// Engine-side producer closure (e.g. its transport went away): the
    /// record self-removes from both registries, no broadcast.
    fn handle_producer_vanished(&mut self, producer_id: &str) {
        let Some(entry) = self.registry.remove(producer_id) else {
            // Already reclaimed by an explicit close / forced stop / disconnect
            return;
        };

        if let Some(peer) = self.peers.get_mut(&entry.session_id) {
            peer.producers.remove(producer_id);
        }
        self.metrics.producer_closed();

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            producer_id = %producer_id,
            "Producer reclaimed after engine-side closure"
        );
    }

    /// Engine-side consumer closure. If the mirrored producer is gone this
    /// is the producer-close cascade and the owning session gets a local
    /// stream-closed push; otherwise the session's own transport died and
    /// the record is dropped quietly.
    async fn handle_consumer_vanished(&mut self, connection_id: &str, consumer_id: &str) {
        let removed = self
            .peers
            .get_mut(connection_id)
            .and_then(|peer| peer.consumers.remove(consumer_id));

        let Some(consumer) = removed else {
            return;
        };
        self.metrics.consumer_closed();

        if self.registry.get(&consumer.producer_id).is_none() {
            self.push_to(
                connection_id,
                ServerEvent::ProducerClosed {
                    producer_id: consumer.producer_id,
                },
            )
            .await;
        }
    }

    /// Get current room state.
    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            peers: self.participant_list(),
            producer_count: self.peers.values().map(|p| p.producers.len()).sum(),
            has_router: self.router.is_some(),
            created_at: self.created_at,
        }
    }

    /// Remove one producer from both registries and close its engine handle.
    async fn remove_producer(&mut self, producer_id: &str, owner_id: &str) {
        let Some(entry) = self.registry.remove(producer_id) else {
            return;
        };
        if let Some(peer) = self.peers.get_mut(owner_id) {
            peer.producers.remove(producer_id);
        }
        self.metrics.producer_closed();

        if let Err(e) = entry.handle.close().await {
            warn!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                producer_id = %producer_id,
                error = %e,
                "Engine failed to close producer"
            );
        }
    }

    /// Membership snapshot in join order.
    fn participant_list(&self) -> Vec<PeerInfo> {
        let mut ordered: Vec<&Peer> = self.peers.values().collect();
        ordered.sort_by_key(|p| p.join_seq);
        ordered.into_iter().map(Peer::to_info).collect()
    }

    /// Push the current membership snapshot to every member, including the
    /// one whose action triggered the change.
    async fn broadcast_participants(&self) {
        let participants = self.participant_list();
        for peer in self.peers.values() {
            let _ = peer
                .connection
                .deliver(ServerEvent::UpdateParticipants {
                    participants: participants.clone(),
                })
                .await;
        }
    }

    /// Push an event to every peer.
    async fn push_to_all(&self, event: ServerEvent) {
        for peer in self.peers.values() {
            let _ = peer.connection.deliver(event.clone()).await;
        }
    }

    /// Push an event to every peer except one.
    async fn push_to_others(&self, except_connection_id: &str, event: ServerEvent) {
        for peer in self.peers.values() {
            if peer.connection_id != except_connection_id {
                let _ = peer.connection.deliver(event.clone()).await;
            }
        }
    }

    /// Push an event to a single peer.
    async fn push_to(&self, connection_id: &str, event: ServerEvent) {
        if let Some(peer) = self.peers.get(connection_id) {
            let _ = peer.connection.deliver(event).await;
        }
    }

    /// Perform graceful shutdown: reclaim every live session's engine state
    /// so the process exits with consistent registries. No broadcasts; the
    /// connections are being torn down with us.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            "Performing graceful shutdown"
        );

        for (_, peer) in self.peers.drain() {
            for (producer_id, handle) in peer.producers {
                let _ = self.registry.remove(&producer_id);
                self.metrics.producer_closed();
                if let Err(e) = handle.close().await {
                    warn!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        producer_id = %producer_id,
                        error = %e,
                        "Engine failed to close producer during shutdown"
                    );
                }
            }
            for (_, consumer) in peer.consumers {
                self.metrics.consumer_closed();
                let _ = consumer.handle.close().await;
            }
            for transport in [peer.producer_transport, peer.consumer_transport]
                .into_iter()
                .flatten()
            {
                let _ = transport.close().await;
            }
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "Graceful shutdown complete"
        );
    }

    /// Watch for engine-side producer closure.
    fn spawn_producer_watcher(&self, producer_id: String, closed: CancellationToken) {
        let sender = self.self_sender.clone();
        let room_token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = closed.cancelled() => {
                    let _ = sender.send(RoomMessage::ProducerVanished { producer_id }).await;
                }
                () = room_token.cancelled() => {}
            }
        });
    }

    /// Watch for engine-side consumer closure.
    fn spawn_consumer_watcher(
        &self,
        connection_id: String,
        consumer_id: String,
        closed: CancellationToken,
    ) {
        let sender = self.self_sender.clone();
        let room_token = self.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = closed.cancelled() => {
                    let _ = sender
                        .send(RoomMessage::ConsumerVanished {
                            connection_id,
                            consumer_id,
                        })
                        .await;
                }
                () = room_token.cancelled() => {}
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use crate::engine::local::LocalMediaEngine;
    use serde_json::json;
    use std::time::Duration;

    struct TestRoom {
        handle: RoomActorHandle,
        registry: Arc<ProducerRegistry>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_room(room_id: &str) -> TestRoom {
        let metrics = ActorMetrics::new();
        let registry = Arc::new(ProducerRegistry::new());
        let (handle, _task) = RoomActor::spawn(
            room_id.to_string(),
            Arc::new(LocalMediaEngine::new()),
            Arc::clone(&registry),
            CancellationToken::new(),
            Arc::clone(&metrics),
            64,
        );
        TestRoom {
            handle,
            registry,
            metrics,
        }
    }

    fn test_connection(
        room: &TestRoom,
        connection_id: &str,
    ) -> (ConnectionActorHandle, mpsc::Receiver<ServerEvent>) {
        let (sink_tx, sink_rx) = mpsc::channel(64);
        let (handle, _task) = ConnectionActor::spawn(
            connection_id.to_string(),
            sink_tx,
            CancellationToken::new(),
            Arc::clone(&room.metrics),
        );
        (handle, sink_rx)
    }

    async fn join(
        room: &TestRoom,
        connection_id: &str,
        name: &str,
    ) -> (JoinResult, mpsc::Receiver<ServerEvent>) {
        let (conn, rx) = test_connection(room, connection_id);
        let result = room
            .handle
            .join(connection_id.to_string(), name.to_string(), conn)
            .await
            .unwrap();
        (result, rx)
    }

    /// Drain events until one matches, with a timeout so failures are loud.
    async fn expect_event<F>(rx: &mut mpsc::Receiver<ServerEvent>, mut matcher: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if matcher(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event not delivered")
    }

    #[tokio::test]
    async fn test_first_joiner_becomes_host() {
        let room = spawn_room("r1");

        let (alice, _rx_a) = join(&room, "conn-a", "Alice").await;
        assert!(alice.is_host);
        assert!(alice.can_produce);
        assert!(alice.existing_producers.is_empty());

        let (bob, _rx_b) = join(&room, "conn-b", "Bob").await;
        assert!(!bob.is_host);
        assert!(!bob.can_produce);

        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.peers.len(), 2);
        assert!(snapshot.has_router);
        // Join order is preserved and exactly one host exists
        assert_eq!(snapshot.peers[0].id, "conn-a");
        assert_eq!(snapshot.peers.iter().filter(|p| p.is_host).count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;

        let (conn, _rx) = test_connection(&room, "conn-a");
        let result = room
            .handle
            .join("conn-a".to_string(), "Alice again".to_string(), conn)
            .await;
        assert!(matches!(result, Err(RcError::AlreadyJoined)));
    }

    #[tokio::test]
    async fn test_room_capacity_enforced() {
        let metrics = ActorMetrics::new();
        let registry = Arc::new(ProducerRegistry::new());
        let (handle, _task) = RoomActor::spawn(
            "r1".to_string(),
            Arc::new(LocalMediaEngine::new()),
            Arc::clone(&registry),
            CancellationToken::new(),
            Arc::clone(&metrics),
            1,
        );
        let room = TestRoom {
            handle,
            registry,
            metrics,
        };

        let _ = join(&room, "conn-a", "Alice").await;
        let (conn, _rx) = test_connection(&room, "conn-b");
        let result = room
            .handle
            .join("conn-b".to_string(), "Bob".to_string(), conn)
            .await;
        assert!(matches!(result, Err(RcError::RoomAtCapacity(_))));
    }

    #[tokio::test]
    async fn test_produce_requires_permission_and_transport() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        let _ = join(&room, "conn-b", "Bob").await;

        // Bob is a viewer: permission denied before any transport check
        let result = room
            .handle
            .produce(
                "conn-b".to_string(),
                MediaKind::Video,
                json!({}),
                json!({}),
            )
            .await;
        assert!(matches!(result, Err(RcError::PermissionDenied(_))));

        // Alice can produce but has no transport yet
        let result = room
            .handle
            .produce(
                "conn-a".to_string(),
                MediaKind::Video,
                json!({}),
                json!({}),
            )
            .await;
        assert!(matches!(result, Err(RcError::TransportNotReady)));

        // Nothing was registered by the failed attempts
        assert!(room.registry.is_empty());
    }

    #[tokio::test]
    async fn test_produce_registers_and_announces() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        let (_, mut rx_b) = join(&room, "conn-b", "Bob").await;

        room.handle
            .create_transport("conn-a".to_string(), TransportDirection::Producer)
            .await
            .unwrap();
        let producer_id = room
            .handle
            .produce(
                "conn-a".to_string(),
                MediaKind::Video,
                json!({}),
                json!({"source": "camera"}),
            )
            .await
            .unwrap();

        assert!(room.registry.get(&producer_id).is_some());

        let event = expect_event(&mut rx_b, |e| {
            matches!(e, ServerEvent::NewProducer { .. })
        })
        .await;
        assert!(matches!(
            event,
            ServerEvent::NewProducer { producer_id: id } if id == producer_id
        ));
    }

    #[tokio::test]
    async fn test_promote_by_non_host_is_silent_noop() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        let _ = join(&room, "conn-b", "Bob").await;
        let _ = join(&room, "conn-c", "Carol").await;

        // Bob (viewer) tries to promote Carol
        room.handle
            .promote_peer("conn-b".to_string(), "conn-c".to_string())
            .await
            .unwrap();

        let snapshot = room.handle.snapshot().await.unwrap();
        let carol = snapshot.peers.iter().find(|p| p.id == "conn-c").unwrap();
        assert!(!carol.can_produce);
    }

    #[tokio::test]
    async fn test_promote_grants_permission_and_notifies_target() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        let (_, mut rx_b) = join(&room, "conn-b", "Bob").await;

        room.handle
            .promote_peer("conn-a".to_string(), "conn-b".to_string())
            .await
            .unwrap();

        let event = expect_event(&mut rx_b, |e| {
            matches!(e, ServerEvent::PermissionGranted { .. })
        })
        .await;
        assert!(matches!(
            event,
            ServerEvent::PermissionGranted { can_produce: true }
        ));

        let snapshot = room.handle.snapshot().await.unwrap();
        let bob = snapshot.peers.iter().find(|p| p.id == "conn-b").unwrap();
        assert!(bob.can_produce);
        assert!(!bob.is_host);
    }

    #[tokio::test]
    async fn test_disconnect_reclaims_producers_and_is_idempotent() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        let (_, mut rx_b) = join(&room, "conn-b", "Bob").await;

        room.handle
            .create_transport("conn-a".to_string(), TransportDirection::Producer)
            .await
            .unwrap();
        let p1 = room
            .handle
            .produce("conn-a".to_string(), MediaKind::Audio, json!({}), json!({}))
            .await
            .unwrap();
        let p2 = room
            .handle
            .produce("conn-a".to_string(), MediaKind::Video, json!({}), json!({}))
            .await
            .unwrap();
        assert_eq!(room.registry.len(), 2);

        room.handle.disconnect("conn-a".to_string()).await.unwrap();
        assert!(room.registry.is_empty());

        // Bob saw one producerClosed per reclaimed producer
        let mut closed = Vec::new();
        for _ in 0..2 {
            let event = expect_event(&mut rx_b, |e| {
                matches!(e, ServerEvent::ProducerClosed { .. })
            })
            .await;
            if let ServerEvent::ProducerClosed { producer_id } = event {
                closed.push(producer_id);
            }
        }
        closed.sort();
        let mut expected = vec![p1, p2];
        expected.sort();
        assert_eq!(closed, expected);

        // And the membership update no longer lists Alice
        let event = expect_event(&mut rx_b, |e| {
            matches!(e, ServerEvent::UpdateParticipants { .. })
        })
        .await;
        if let ServerEvent::UpdateParticipants { participants } = event {
            assert!(participants.iter().all(|p| p.id != "conn-a"));
        }

        // Second cleanup is a no-op
        room.handle.disconnect("conn-a".to_string()).await.unwrap();
        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.peers.len(), 1);
    }

    #[tokio::test]
    async fn test_host_reassigned_after_room_empties() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        room.handle.disconnect("conn-a".to_string()).await.unwrap();

        // Router persists; the next joiner finds an empty peer set and
        // becomes host
        let (bob, _rx) = join(&room, "conn-b", "Bob").await;
        assert!(bob.is_host);
        assert!(bob.can_produce);

        let snapshot = room.handle.snapshot().await.unwrap();
        assert!(snapshot.has_router);
        assert_eq!(snapshot.peers.len(), 1);
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_creates_no_record() {
        let room = spawn_room("r1");
        let _ = join(&room, "conn-a", "Alice").await;
        room.handle
            .create_transport("conn-a".to_string(), TransportDirection::Consumer)
            .await
            .unwrap();

        let result = room
            .handle
            .consume(
                "conn-a".to_string(),
                "producer-missing".to_string(),
                json!({}),
            )
            .await;
        assert!(matches!(result, Err(RcError::ProducerNotFound(_))));

        let snapshot = room.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.producer_count, 0);
    }
}
