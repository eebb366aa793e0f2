//! Signaling wire types.
//!
//! Requests, responses and server-push events exchanged with clients over
//! whatever ordered message channel embeds the coordinator. Field and tag
//! names are camelCase on the wire. Engine payloads stay opaque
//! [`Value`]s end to end.

use crate::engine::MediaKind;
use crate::errors::RcError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room-membership view of one peer, broadcast to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Connection identifier.
    pub id: String,
    /// Display name (user-supplied, untrusted).
    pub name: String,
    /// Whether this peer holds host authority.
    pub is_host: bool,
    /// Whether this peer may publish streams.
    pub can_produce: bool,
}

/// A client request. Every request gets exactly one [`ServerResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, display_name: String },

    #[serde(rename_all = "camelCase")]
    CreateProducerTransport {
        #[serde(default)]
        capabilities: Value,
    },

    #[serde(rename_all = "camelCase")]
    CreateConsumerTransport {
        #[serde(default)]
        capabilities: Value,
    },

    #[serde(rename_all = "camelCase")]
    ConnectProducerTransport { security: Value },

    #[serde(rename_all = "camelCase")]
    ConnectConsumerTransport { security: Value },

    #[serde(rename_all = "camelCase")]
    Produce {
        kind: MediaKind,
        media_parameters: Value,
        #[serde(default)]
        app_data: Value,
    },

    #[serde(rename_all = "camelCase")]
    Consume {
        producer_id: String,
        capabilities: Value,
    },

    #[serde(rename_all = "camelCase")]
    Resume { consumer_id: String },

    #[serde(rename_all = "camelCase")]
    ProducerClose { producer_id: String },

    #[serde(rename_all = "camelCase")]
    PromoteToProducer { target_peer_id: String },

    #[serde(rename_all = "camelCase")]
    ForceStopProducer { producer_id: String },
}

/// Error payload of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Wire error class (see [`RcError::error_code`]).
    pub code: i32,
    /// Human-readable, client-safe message.
    pub message: String,
}

/// The single response paired with a [`ClientRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerResponse {
    /// Success payload for `joinRoom`.
    #[serde(rename_all = "camelCase")]
    Joined {
        routing_capabilities: Value,
        existing_producers: Vec<String>,
        is_host: bool,
        can_produce: bool,
    },

    /// Success payload for transport creation.
    #[serde(rename_all = "camelCase")]
    TransportCreated { params: Value },

    /// Success payload for `produce`.
    #[serde(rename_all = "camelCase")]
    Produced { producer_id: String },

    /// Success payload for `consume`. `appData` is the tag attached at
    /// produce time, returned verbatim.
    #[serde(rename_all = "camelCase")]
    Consumed {
        consumer_id: String,
        producer_id: String,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
    },

    /// Bare acknowledgment (connect, resume, fire-and-forget requests).
    Ack,

    /// Failure payload.
    Error { error: ErrorBody },
}

impl ServerResponse {
    /// Build the failure payload for an error.
    #[must_use]
    pub fn from_error(err: &RcError) -> Self {
        ServerResponse::Error {
            error: ErrorBody {
                code: err.error_code(),
                message: err.client_message(),
            },
        }
    }

    /// Whether this response is a failure payload.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ServerResponse::Error { .. })
    }
}

/// Server-initiated push events. Not correlated to any request; delivered
/// in server order over each connection's push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full membership snapshot of the room, in join order.
    #[serde(rename_all = "camelCase")]
    UpdateParticipants { participants: Vec<PeerInfo> },

    /// A new stream is available to consume.
    #[serde(rename_all = "camelCase")]
    NewProducer { producer_id: String },

    /// A stream went away; tear down any consumer mirroring it.
    #[serde(rename_all = "camelCase")]
    ProducerClosed { producer_id: String },

    /// The receiving peer may now publish.
    #[serde(rename_all = "camelCase")]
    PermissionGranted { can_produce: bool },

    /// The receiving peer's own stream was stopped by the host.
    #[serde(rename_all = "camelCase")]
    ProducerForcedStop { producer_id: String },
}
