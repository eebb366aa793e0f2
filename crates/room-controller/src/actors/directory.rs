//! `RoomDirectoryActor` - singleton supervisor and room registry.
//!
//! The `RoomDirectoryActor` is the top-level actor in the hierarchy:
//!
//! - Singleton per controller instance
//! - Owns the room-id -> room-actor map and supervises N `RoomActor`s
//! - Resolves rooms lazily: the first join for an unknown id creates the
//!   room actor, which in turn acquires its router capability on first use.
//!   Because resolution is serialized here, two simultaneous first-joins
//!   can never create two rooms (or two routers) for one id
//! - Never removes a room on its own when it empties out; rooms stay
//!   resolvable for reconnection until removed explicitly or at shutdown
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)

use crate::engine::MediaEngine;
use crate::errors::RcError;
use crate::registry::ProducerRegistry;

use super::messages::{DirectoryMessage, DirectoryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the directory mailbox.
const DIRECTORY_CHANNEL_BUFFER: usize = 1000;

/// Limits applied when admitting rooms and peers.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryLimits {
    /// Maximum concurrently live rooms.
    pub max_rooms: u32,
    /// Maximum peers admitted to a single room.
    pub max_peers_per_room: u32,
}

/// Handle to the `RoomDirectoryActor`.
///
/// This is the public interface for interacting with the directory.
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomDirectoryActorHandle {
    sender: mpsc::Sender<DirectoryMessage>,
    cancel_token: CancellationToken,
}

impl RoomDirectoryActorHandle {
    /// Create a new `RoomDirectoryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    ///
    /// # Arguments
    ///
    /// * `rc_id` - Controller instance ID
    /// * `engine` - Media engine backend the rooms acquire routers from
    /// * `registry` - Process-wide producer registry shared by all rooms
    /// * `metrics` - Shared actor metrics
    /// * `limits` - Room/peer admission limits
    #[must_use]
    pub fn new(
        rc_id: String,
        engine: Arc<dyn MediaEngine>,
        registry: Arc<ProducerRegistry>,
        metrics: Arc<ActorMetrics>,
        limits: DirectoryLimits,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomDirectoryActor::new(
            rc_id,
            receiver,
            cancel_token.clone(),
            engine,
            registry,
            metrics,
            limits,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Resolve a room, creating it lazily on first use.
    pub async fn get_or_create_room(&self, room_id: String) -> Result<RoomActorHandle, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a room.
    pub async fn remove_room(&self, room_id: String) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::RemoveRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current directory status.
    pub async fn get_status(&self) -> Result<DirectoryStatus, RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), RcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for connection actors and auxiliary tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    /// Handle to the room actor.
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
}

/// The `RoomDirectoryActor` implementation.
///
/// This struct owns the actor state and runs the message loop.
pub struct RoomDirectoryActor {
    /// Controller instance ID.
    rc_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<DirectoryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Media engine backend.
    engine: Arc<dyn MediaEngine>,
    /// Process-wide producer registry.
    registry: Arc<ProducerRegistry>,
    /// Managed rooms by ID.
    rooms: HashMap<String, ManagedRoom>,
    /// Whether the directory is accepting new rooms.
    accepting_new: bool,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
    /// Admission limits.
    limits: DirectoryLimits,
}

impl RoomDirectoryActor {
    /// Create a new directory actor (not started).
    fn new(
        rc_id: String,
        receiver: mpsc::Receiver<DirectoryMessage>,
        cancel_token: CancellationToken,
        engine: Arc<dyn MediaEngine>,
        registry: Arc<ProducerRegistry>,
        metrics: Arc<ActorMetrics>,
        limits: DirectoryLimits,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Directory, &rc_id);

        Self {
            rc_id,
            receiver,
            cancel_token,
            engine,
            registry,
            rooms: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox,
            limits,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.directory", fields(rc_id = %self.rc_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            "RoomDirectoryActor started"
        );

        loop {
            // Check for terminated room actors
            self.check_room_health().await;

            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.directory",
                        rc_id = %self.rc_id,
                        "RoomDirectoryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            // Channel closed, exit
                            info!(
                                target: "rc.actor.directory",
                                rc_id = %self.rc_id,
                                "RoomDirectoryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomDirectoryActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: DirectoryMessage) {
        match message {
            DirectoryMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id);
                let _ = respond_to.send(result);
            }

            DirectoryMessage::RemoveRoom {
                room_id,
                respond_to,
            } => {
                let result = self.remove_room(&room_id);
                let _ = respond_to.send(result);
            }

            DirectoryMessage::GetStatus { respond_to } => {
                let status = self.get_status();
                let _ = respond_to.send(status);
            }

            DirectoryMessage::Shutdown { respond_to } => {
                let result = self.initiate_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    /// Resolve a room handle, spawning the room actor on first use.
    ///
    /// The room actor acquires its router capability lazily on first join,
    /// so no engine round-trip happens on this path.
    fn get_or_create_room(&mut self, room_id: String) -> Result<RoomActorHandle, RcError> {
        if let Some(managed) = self.rooms.get(&room_id) {
            return Ok(managed.handle.clone());
        }

        if !self.accepting_new {
            return Err(RcError::Draining);
        }

        if self.rooms.len() >= self.limits.max_rooms as usize {
            warn!(
                target: "rc.actor.directory",
                rc_id = %self.rc_id,
                max_rooms = self.limits.max_rooms,
                "Room limit reached, refusing new room"
            );
            return Err(RcError::AtCapacity);
        }

        debug!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            room_id = %room_id,
            "Creating new room actor"
        );

        // Create child token for the room
        let room_token = self.cancel_token.child_token();

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.registry),
            room_token,
            Arc::clone(&self.metrics),
            self.limits.max_peers_per_room,
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );

        self.metrics.room_created();

        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    /// Remove a room.
    ///
    /// This method initiates room removal but does not block waiting for
    /// the room actor task to complete. The cleanup is spawned as a
    /// background task to avoid blocking the message loop.
    fn remove_room(&mut self, room_id: &str) -> Result<(), RcError> {
        match self.rooms.remove(room_id) {
            Some(managed) => {
                debug!(
                    target: "rc.actor.directory",
                    rc_id = %self.rc_id,
                    room_id = %room_id,
                    "Removing room actor"
                );

                // Cancel the room actor
                managed.handle.cancel();

                // Wait for cleanup off the message loop
                let room_id_owned = room_id.to_string();
                let rc_id = self.rc_id.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                        Ok(Ok(())) => {
                            debug!(
                                target: "rc.actor.directory",
                                rc_id = %rc_id,
                                room_id = %room_id_owned,
                                "Room actor task completed cleanly"
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(
                                target: "rc.actor.directory",
                                rc_id = %rc_id,
                                room_id = %room_id_owned,
                                error = ?e,
                                "Room actor task panicked during removal"
                            );
                        }
                        Err(_) => {
                            warn!(
                                target: "rc.actor.directory",
                                rc_id = %rc_id,
                                room_id = %room_id_owned,
                                "Room actor task cleanup timed out"
                            );
                        }
                    }
                });

                self.metrics.room_removed();

                info!(
                    target: "rc.actor.directory",
                    rc_id = %self.rc_id,
                    room_id = %room_id,
                    total_rooms = self.rooms.len(),
                    "Room actor removed"
                );

                Ok(())
            }
            None => Err(RcError::RoomNotFound(room_id.to_string())),
        }
    }

    /// Get current directory status.
    fn get_status(&self) -> DirectoryStatus {
        DirectoryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Initiate graceful shutdown.
    fn initiate_shutdown(&mut self) -> Result<(), RcError> {
        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        // Stop accepting new rooms
        self.accepting_new = false;

        // Cancel the root token (propagates to all children)
        self.cancel_token.cancel();

        Ok(())
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        // Stop accepting new rooms
        self.accepting_new = false;

        // Cancel all room actors (already done via parent token, but be explicit)
        for (room_id, managed) in &self.rooms {
            debug!(
                target: "rc.actor.directory",
                rc_id = %self.rc_id,
                room_id = %room_id,
                "Cancelling room actor"
            );
            managed.handle.cancel();
        }

        // Wait for all room tasks to complete
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(Duration::from_secs(30), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.directory",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.directory",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.directory",
                        rc_id = %self.rc_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "rc.actor.directory",
            rc_id = %self.rc_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let mut finished = Vec::new();

        for (room_id, managed) in &self.rooms {
            if managed.task_handle.is_finished() {
                warn!(
                    target: "rc.actor.directory",
                    rc_id = %self.rc_id,
                    room_id = %room_id,
                    "Room actor task finished unexpectedly"
                );
                finished.push(room_id.clone());
            }
        }

        for room_id in finished {
            if let Some(managed) = self.rooms.remove(&room_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        info!(
                            target: "rc.actor.directory",
                            rc_id = %self.rc_id,
                            room_id = %room_id,
                            "Room actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "rc.actor.directory",
                                rc_id = %self.rc_id,
                                room_id = %room_id,
                                error = ?join_error,
                                "Room actor panicked"
                            );
                            self.metrics.record_panic(ActorType::Room);
                        }
                    }
                }

                self.metrics.room_removed();
            }
        }
    }
}
