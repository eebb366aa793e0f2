//! Media engine capability interfaces.
//!
//! The coordinator never touches media itself. It talks to an external
//! engine through these object-safe traits and holds the returned handles
//! as opaque capabilities: a router per room, up to two transports per
//! session, and a handle per producer/consumer.
//!
//! All engine-defined payloads (routing capabilities, transport connection
//! parameters, media parameters, `appData` tags) travel through the
//! coordinator as raw [`serde_json::Value`]s and are never interpreted.
//!
//! # Closure contract
//!
//! Every handle exposes a [`CancellationToken`] via `closed()` that fires
//! when the engine-side object goes away, whatever the cause. Backends must
//! cascade: closing a transport closes the producers/consumers created on
//! it, and closing a producer closes the consumers mirroring it. The
//! coordinator attaches reclaim watchers to these tokens so its registries
//! self-heal when the engine tears something down on its own.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Media kind of a produced or consumed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Errors surfaced by a media engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected the request (bad parameters, unknown ids).
    #[error("engine rejected request: {0}")]
    Rejected(String),

    /// The handle (or its parent) is already closed.
    #[error("engine handle closed")]
    Closed,

    /// Any other backend failure.
    #[error("engine failure: {0}")]
    Other(String),
}

/// Entry point into a media engine backend.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a routing context. One router serves one room for the room's
    /// whole lifetime.
    async fn create_router(&self) -> Result<Arc<dyn RouterHandle>, EngineError>;
}

/// A per-room routing context.
#[async_trait]
pub trait RouterHandle: Send + Sync {
    /// Engine-assigned router id.
    fn id(&self) -> &str;

    /// Routing capabilities advertised to joining clients.
    fn capabilities(&self) -> Value;

    /// Whether a subscriber with `capabilities` can consume `producer_id`.
    async fn can_consume(&self, producer_id: &str, capabilities: &Value) -> bool;

    /// Create a transport on this router.
    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError>;
}

/// A transport carrying one session's produced or consumed streams.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Engine-assigned transport id.
    fn id(&self) -> &str;

    /// Connection parameters the client needs to complete setup.
    fn connect_params(&self) -> Value;

    /// Finish transport setup with client-supplied security parameters.
    async fn connect(&self, security: Value) -> Result<(), EngineError>;

    /// Publish a stream on this transport.
    async fn produce(
        &self,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError>;

    /// Subscribe to `producer_id` on this transport. Consumers start paused;
    /// the subscriber resumes once its playback path is wired up.
    async fn consume(
        &self,
        producer_id: &str,
        capabilities: Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError>;

    /// Close the transport and everything created on it.
    async fn close(&self) -> Result<(), EngineError>;

    /// Fires when the transport is closed, by either side.
    fn closed(&self) -> CancellationToken;
}

/// A published stream.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// Engine-assigned producer id.
    fn id(&self) -> &str;

    /// Media kind of the stream.
    fn kind(&self) -> MediaKind;

    /// Close the producer and any consumers mirroring it.
    async fn close(&self) -> Result<(), EngineError>;

    /// Fires when the producer is closed, by either side.
    fn closed(&self) -> CancellationToken;
}

/// One session's subscription to a producer.
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    /// Engine-assigned consumer id.
    fn id(&self) -> &str;

    /// Media kind of the mirrored stream.
    fn kind(&self) -> MediaKind;

    /// Media parameters the client needs to receive the stream.
    fn media_parameters(&self) -> Value;

    /// Whether the consumer is still paused.
    fn paused(&self) -> bool;

    /// Unpause delivery.
    async fn resume(&self) -> Result<(), EngineError>;

    /// Close the consumer.
    async fn close(&self) -> Result<(), EngineError>;

    /// Fires when the consumer is closed, by either side.
    fn closed(&self) -> CancellationToken;
}
