//! `ConnectionActor` - per-client push channel.
//!
//! Each `ConnectionActor`:
//! - Owns the ordered server-push channel for exactly one client connection
//! - Receives events from room/directory actors and forwards them to the
//!   outbound sink supplied by the embedding transport
//! - Guarantees clients observe pushes in the order the server issued them
//!
//! # Lifecycle
//!
//! 1. Created when the transport accepts a client connection
//! 2. Runs until the connection closes or the controller shuts down
//! 3. Cancellation via child token propagates from the directory

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::RcError;
use crate::signaling::ServerEvent;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Push an event to the client.
    pub async fn deliver(&self, event: ServerEvent) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Deliver { event })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the push channel.
    pub async fn close(&self, reason: String) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Connection ID.
    connection_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Outbound sink the embedding transport drains to the wire.
    sink: mpsc::Sender<ServerEvent>,
    /// Cancellation token (child of the directory's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
    /// Whether the connection is closing.
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: String,
        sink: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_created();

        let actor = Self {
            connection_id: connection_id.clone(),
            receiver,
            sink,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, &connection_id),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "rc.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "rc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                self.handle_deliver(event).await;
                false
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "rc.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing push channel"
                );
                self.is_closing = true;
                true
            }
        }
    }

    /// Forward one event to the client sink.
    async fn handle_deliver(&mut self, event: ServerEvent) {
        if self.is_closing {
            warn!(
                target: "rc.actor.connection",
                connection_id = %self.connection_id,
                "Dropped event push while closing"
            );
            return;
        }

        debug!(
            target: "rc.actor.connection",
            connection_id = %self.connection_id,
            event_type = ?std::mem::discriminant(&event),
            "Pushing event to client"
        );

        if self.sink.send(event).await.is_err() {
            // The transport side dropped its receiver; the connection is
            // effectively gone and cleanup will follow via disconnect.
            debug!(
                target: "rc.actor.connection",
                connection_id = %self.connection_id,
                "Client sink closed, suppressing further pushes"
            );
            self.is_closing = true;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn_actor(
        buffer: usize,
    ) -> (
        ConnectionActorHandle,
        JoinHandle<()>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let metrics = ActorMetrics::new();
        let cancel_token = CancellationToken::new();
        let (sink_tx, sink_rx) = mpsc::channel(buffer);
        let (handle, task) =
            ConnectionActor::spawn("conn-123".to_string(), sink_tx, cancel_token, metrics);
        (handle, task, sink_rx)
    }

    #[tokio::test]
    async fn test_connection_actor_spawn() {
        let (handle, _task, _rx) = spawn_actor(8);

        assert_eq!(handle.connection_id(), "conn-123");
        assert!(!handle.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_connection_actor_delivers_in_order() {
        let (handle, _task, mut rx) = spawn_actor(8);

        handle
            .deliver(ServerEvent::NewProducer {
                producer_id: "p1".to_string(),
            })
            .await
            .unwrap();
        handle
            .deliver(ServerEvent::ProducerClosed {
                producer_id: "p1".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::NewProducer { producer_id }) if producer_id == "p1"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServerEvent::ProducerClosed { producer_id }) if producer_id == "p1"
        ));

        handle.cancel();
    }

    #[tokio::test]
    async fn test_connection_actor_close_stops_task() {
        let (handle, task, _rx) = spawn_actor(8);

        handle.close("test close".to_string()).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_actor_cancellation_stops_task() {
        let (handle, task, _rx) = spawn_actor(8);

        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_actor_survives_dropped_sink() {
        let (handle, _task, rx) = spawn_actor(8);
        drop(rx);

        // Delivery into a dropped sink must not error the caller
        let result = handle
            .deliver(ServerEvent::PermissionGranted { can_produce: true })
            .await;
        assert!(result.is_ok());

        handle.cancel();
    }
}
