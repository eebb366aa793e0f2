//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply exchanges carry a
//! `tokio::sync::oneshot` sender. Fire-and-forget protocol requests still
//! carry a unit reply so callers can observe completion ordering, but no
//! error ever travels back on those paths.

use crate::engine::MediaKind;
use crate::errors::RcError;
use crate::signaling::{PeerInfo, ServerEvent};

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;

use serde_json::Value;
use tokio::sync::oneshot;

/// Messages sent to `RoomDirectoryActor`.
#[derive(Debug)]
pub enum DirectoryMessage {
    /// Resolve a room, creating it lazily on first use.
    GetOrCreateRoom {
        room_id: String,
        /// Response channel for the room actor handle or error.
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    /// Remove a room (operational use and shutdown; rooms are not reaped
    /// automatically when they empty out).
    RemoveRoom {
        room_id: String,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Get current directory status (for health checks).
    GetStatus {
        /// Response channel for the status.
        respond_to: oneshot::Sender<DirectoryStatus>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Which of a session's two transports a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    /// The transport carrying the session's published streams.
    Producer,
    /// The transport carrying the session's subscriptions.
    Consumer,
}

impl TransportDirection {
    /// Returns the direction as a string for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Producer => "producer",
            TransportDirection::Consumer => "consumer",
        }
    }
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection wants to join this room.
    Join {
        connection_id: String,
        display_name: String,
        /// Push channel of the joining connection.
        connection: ConnectionActorHandle,
        /// Response channel for the join result.
        respond_to: oneshot::Sender<Result<JoinResult, RcError>>,
    },

    /// Create the session's producer- or consumer-side transport.
    CreateTransport {
        connection_id: String,
        direction: TransportDirection,
        /// Response channel for the transport connection parameters.
        respond_to: oneshot::Sender<Result<Value, RcError>>,
    },

    /// Finish transport setup with client security parameters.
    ConnectTransport {
        connection_id: String,
        direction: TransportDirection,
        security: Value,
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    /// Publish a stream.
    Produce {
        connection_id: String,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
        /// Response channel for the new producer id.
        respond_to: oneshot::Sender<Result<String, RcError>>,
    },

    /// Subscribe to an existing producer.
    Consume {
        connection_id: String,
        producer_id: String,
        capabilities: Value,
        /// Response channel for the consume result.
        respond_to: oneshot::Sender<Result<ConsumeResult, RcError>>,
    },

    /// Unpause a consumer. Unknown or foreign ids are ignored.
    Resume {
        connection_id: String,
        consumer_id: String,
        /// Completion ack (never an error).
        respond_to: oneshot::Sender<()>,
    },

    /// Close an owned producer. Ignored unless the caller owns it.
    CloseProducer {
        connection_id: String,
        producer_id: String,
        /// Completion ack (never an error).
        respond_to: oneshot::Sender<()>,
    },

    /// Grant publish permission to another peer. Ignored unless the caller
    /// is the host.
    PromotePeer {
        connection_id: String,
        target_peer_id: String,
        /// Completion ack (never an error).
        respond_to: oneshot::Sender<()>,
    },

    /// Stop another peer's producer. Ignored unless the caller is the host
    /// and the producer lives in this room.
    ForceStopProducer {
        connection_id: String,
        producer_id: String,
        /// Completion ack (never an error).
        respond_to: oneshot::Sender<()>,
    },

    /// The connection's channel terminated; reclaim everything it owned.
    /// Safe to deliver more than once.
    Disconnect {
        connection_id: String,
        /// Completion ack (never an error).
        respond_to: oneshot::Sender<()>,
    },

    /// Internal: the engine closed a producer on its own (e.g. its
    /// transport went away).
    ProducerVanished { producer_id: String },

    /// Internal: the engine closed a consumer on its own.
    ConsumerVanished {
        connection_id: String,
        consumer_id: String,
    },

    /// Get current room state (for debugging/health).
    GetSnapshot {
        /// Response channel for the snapshot.
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Push an event to the connected client.
    Deliver { event: ServerEvent },

    /// Close the connection's push channel gracefully.
    Close { reason: String },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinResult {
    /// Routing capabilities of the room's router.
    pub routing_capabilities: Value,
    /// Producers already live in the room (excluding the joiner's own).
    pub existing_producers: Vec<String>,
    /// Whether the joiner became host (first peer in an empty room).
    pub is_host: bool,
    /// Whether the joiner may publish.
    pub can_produce: bool,
}

/// Result of a successful consume.
#[derive(Debug, Clone)]
pub struct ConsumeResult {
    /// Engine-assigned consumer id.
    pub consumer_id: String,
    /// The producer being mirrored.
    pub producer_id: String,
    /// Media kind of the stream.
    pub kind: MediaKind,
    /// Media parameters for the subscriber.
    pub media_parameters: Value,
    /// The tag attached at produce time, verbatim.
    pub app_data: Value,
}

/// Current state of a room (for debugging/health).
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    /// Room ID.
    pub room_id: String,
    /// Current peers, in join order.
    pub peers: Vec<PeerInfo>,
    /// Producers currently registered by this room's peers.
    pub producer_count: usize,
    /// Whether the router capability has been acquired yet.
    pub has_router: bool,
    /// Room creation timestamp.
    pub created_at: i64,
}

/// Status of the `RoomDirectoryActor`.
#[derive(Debug, Clone)]
pub struct DirectoryStatus {
    /// Live rooms.
    pub room_count: usize,
    /// Active connections across all rooms.
    pub connection_count: usize,
    /// Whether the directory is draining.
    pub is_draining: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_direction_labels() {
        assert_eq!(TransportDirection::Producer.as_str(), "producer");
        assert_eq!(TransportDirection::Consumer.as_str(), "consumer");
        assert_ne!(TransportDirection::Producer, TransportDirection::Consumer);
    }

    #[test]
    fn test_join_result_clone() {
        let result = JoinResult {
            routing_capabilities: serde_json::json!({"codecs": []}),
            existing_producers: vec!["p1".to_string()],
            is_host: true,
            can_produce: true,
        };
        let cloned = result.clone();
        assert_eq!(cloned.existing_producers, result.existing_producers);
        assert!(cloned.is_host);
    }

    #[test]
    fn test_directory_status_fields() {
        let status = DirectoryStatus {
            room_count: 0,
            connection_count: 0,
            is_draining: false,
            mailbox_depth: 0,
        };
        assert_eq!(status.room_count, 0);
        assert!(!status.is_draining);
    }
}
