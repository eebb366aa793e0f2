//! In-process loopback media engine.
//!
//! `LocalMediaEngine` fabricates router/transport/producer/consumer handles
//! without moving any media. It tracks connect/close/pause state and honors
//! the cascade contract of the [`engine`](crate::engine) traits, which makes
//! it the default backend for local development and the workhorse for tests
//! exercising coordinator lifecycle and authorization logic.

use super::{
    ConsumerHandle, EngineError, MediaEngine, MediaKind, ProducerHandle, RouterHandle,
    TransportHandle,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// In-process media engine backend.
#[derive(Debug, Default)]
pub struct LocalMediaEngine;

impl LocalMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_router(&self) -> Result<Arc<dyn RouterHandle>, EngineError> {
        Ok(Arc::new(LocalRouter {
            id: format!("router-{}", Uuid::new_v4()),
            inner: Arc::new(RouterInner::default()),
        }))
    }
}

/// Shared routing state: which producers exist and which consumers mirror them.
#[derive(Default)]
struct RouterInner {
    producers: Mutex<HashMap<String, ProducerSlot>>,
}

struct ProducerSlot {
    kind: MediaKind,
    closed: CancellationToken,
    consumers: Vec<Arc<LocalConsumer>>,
}

impl RouterInner {
    fn producers(&self) -> MutexGuard<'_, HashMap<String, ProducerSlot>> {
        // Lock poisoning cannot leave the map in a torn state; recover.
        self.producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the producer and cascade closure into its consumers.
    fn close_producer(&self, producer_id: &str) {
        let slot = self.producers().remove(producer_id);
        if let Some(slot) = slot {
            slot.closed.cancel();
            for consumer in slot.consumers {
                consumer.closed.cancel();
            }
        }
    }
}

struct LocalRouter {
    id: String,
    inner: Arc<RouterInner>,
}

#[async_trait]
impl RouterHandle for LocalRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Value {
        json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000},
            ]
        })
    }

    async fn can_consume(&self, producer_id: &str, capabilities: &Value) -> bool {
        capabilities.is_object() && self.inner.producers().contains_key(producer_id)
    }

    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError> {
        Ok(Arc::new(LocalTransport {
            id: format!("transport-{}", Uuid::new_v4()),
            router: Arc::clone(&self.inner),
            state: Mutex::new(TransportState::default()),
            closed: CancellationToken::new(),
        }))
    }
}

#[derive(Default)]
struct TransportState {
    connected: bool,
    children: Vec<Child>,
}

enum Child {
    Producer(Arc<LocalProducer>),
    Consumer(Arc<LocalConsumer>),
}

struct LocalTransport {
    id: String,
    router: Arc<RouterInner>,
    state: Mutex<TransportState>,
    closed: CancellationToken,
}

impl LocalTransport {
    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransportHandle for LocalTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn connect_params(&self) -> Value {
        json!({
            "id": self.id,
            "iceParameters": {"usernameFragment": self.id, "password": "loopback"},
            "iceCandidates": [],
            "dtlsParameters": {"role": "auto", "fingerprints": []},
        })
    }

    async fn connect(&self, security: Value) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        if !security.is_object() {
            return Err(EngineError::Rejected(
                "invalid security parameters".to_string(),
            ));
        }
        let mut state = self.state();
        if state.connected {
            return Err(EngineError::Rejected(
                "transport already connected".to_string(),
            ));
        }
        state.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _media_parameters: Value,
        _app_data: Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }

        let producer = Arc::new(LocalProducer {
            id: format!("producer-{}", Uuid::new_v4()),
            kind,
            router: Arc::clone(&self.router),
            closed: CancellationToken::new(),
        });

        self.router.producers().insert(
            producer.id.clone(),
            ProducerSlot {
                kind,
                closed: producer.closed.clone(),
                consumers: Vec::new(),
            },
        );
        self.state().children.push(Child::Producer(Arc::clone(&producer)));

        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        _capabilities: Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }

        let mut producers = self.router.producers();
        let slot = producers
            .get_mut(producer_id)
            .ok_or_else(|| EngineError::Rejected(format!("unknown producer: {producer_id}")))?;

        let kind = slot.kind;
        let consumer = Arc::new(LocalConsumer {
            id: format!("consumer-{}", Uuid::new_v4()),
            kind,
            media_parameters: json!({
                "producerId": producer_id,
                "codecs": [{"mimeType": match kind {
                    MediaKind::Audio => "audio/opus",
                    MediaKind::Video => "video/VP8",
                }}],
            }),
            paused: AtomicBool::new(true),
            closed: CancellationToken::new(),
        });

        slot.consumers.push(Arc::clone(&consumer));
        drop(producers);
        self.state().children.push(Child::Consumer(Arc::clone(&consumer)));

        Ok(consumer)
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let children = std::mem::take(&mut self.state().children);
        for child in children {
            match child {
                Child::Producer(producer) => self.router.close_producer(&producer.id),
                Child::Consumer(consumer) => consumer.closed.cancel(),
            }
        }
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

struct LocalProducer {
    id: String,
    kind: MediaKind,
    router: Arc<RouterInner>,
    closed: CancellationToken,
}

#[async_trait]
impl ProducerHandle for LocalProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.router.close_producer(&self.id);
        self.closed.cancel();
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

struct LocalConsumer {
    id: String,
    kind: MediaKind,
    media_parameters: Value,
    paused: AtomicBool,
    closed: CancellationToken,
}

#[async_trait]
impl ConsumerHandle for LocalConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn media_parameters(&self) -> Value {
        self.media_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.cancel();
        Ok(())
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn setup() -> (Arc<dyn RouterHandle>, Arc<dyn TransportHandle>) {
        let engine = LocalMediaEngine::new();
        let router = engine.create_router().await.unwrap();
        let transport = router.create_transport().await.unwrap();
        (router, transport)
    }

    #[tokio::test]
    async fn test_produce_then_can_consume() {
        let (router, transport) = setup().await;

        let producer = transport
            .produce(MediaKind::Video, json!({}), json!({"source": "camera"}))
            .await
            .unwrap();

        assert!(router.can_consume(producer.id(), &json!({})).await);
        assert!(!router.can_consume("producer-nope", &json!({})).await);
        // Null capabilities are refused regardless of the producer
        assert!(!router.can_consume(producer.id(), &Value::Null).await);
    }

    #[tokio::test]
    async fn test_consumer_starts_paused_and_resumes() {
        let (router, transport) = setup().await;
        let producer = transport
            .produce(MediaKind::Audio, json!({}), json!({}))
            .await
            .unwrap();
        let _ = router;

        let consumer = transport.consume(producer.id(), json!({})).await.unwrap();
        assert!(consumer.paused());
        assert_eq!(consumer.kind(), MediaKind::Audio);

        consumer.resume().await.unwrap();
        assert!(!consumer.paused());
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_rejected() {
        let (_router, transport) = setup().await;

        let result = transport.consume("producer-missing", json!({})).await;
        assert!(matches!(result, Err(EngineError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_producer_close_cascades_to_consumers() {
        let (router, transport) = setup().await;
        let producer = transport
            .produce(MediaKind::Video, json!({}), json!({}))
            .await
            .unwrap();
        let consumer = transport.consume(producer.id(), json!({})).await.unwrap();

        producer.close().await.unwrap();

        assert!(producer.closed().is_cancelled());
        assert!(consumer.closed().is_cancelled());
        assert!(!router.can_consume(producer.id(), &json!({})).await);
        assert!(matches!(consumer.resume().await, Err(EngineError::Closed)));
    }

    #[tokio::test]
    async fn test_transport_close_cascades_to_children() {
        let (router, transport) = setup().await;
        let producer = transport
            .produce(MediaKind::Video, json!({}), json!({}))
            .await
            .unwrap();
        let consumer = transport.consume(producer.id(), json!({})).await.unwrap();

        transport.close().await.unwrap();

        assert!(transport.closed().is_cancelled());
        assert!(producer.closed().is_cancelled());
        assert!(consumer.closed().is_cancelled());
        assert!(!router.can_consume(producer.id(), &json!({})).await);
    }

    #[tokio::test]
    async fn test_connect_rejects_double_connect() {
        let (_router, transport) = setup().await;

        transport.connect(json!({"fingerprint": "ab"})).await.unwrap();
        let result = transport.connect(json!({"fingerprint": "ab"})).await;
        assert!(matches!(result, Err(EngineError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_work() {
        let (_router, transport) = setup().await;
        transport.close().await.unwrap();

        assert!(matches!(
            transport.connect(json!({})).await,
            Err(EngineError::Closed)
        ));
        assert!(matches!(
            transport.produce(MediaKind::Audio, json!({}), json!({})).await,
            Err(EngineError::Closed)
        ));
    }
}
