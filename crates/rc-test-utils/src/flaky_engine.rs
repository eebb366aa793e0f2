//! Failure-injecting media engine wrapper.
//!
//! `FlakyEngine` delegates to any real backend and fails selected
//! operations on demand, for exercising the coordinator's engine-failure
//! paths without a misbehaving engine at hand.

use async_trait::async_trait;
use room_controller::engine::{
    ConsumerHandle, EngineError, MediaEngine, MediaKind, ProducerHandle, RouterHandle,
    TransportHandle,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FailureFlags {
    create_router: AtomicBool,
    create_transport: AtomicBool,
    connect: AtomicBool,
    produce: AtomicBool,
    consume: AtomicBool,
}

impl FailureFlags {
    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), EngineError> {
        if flag.load(Ordering::SeqCst) {
            Err(EngineError::Other(format!("injected {operation} failure")))
        } else {
            Ok(())
        }
    }
}

/// A media engine that fails selected operations on demand.
pub struct FlakyEngine<E> {
    inner: Arc<E>,
    flags: Arc<FailureFlags>,
}

impl<E: MediaEngine + 'static> FlakyEngine<E> {
    /// Wrap a backend.
    pub fn wrap(inner: E) -> Self {
        Self {
            inner: Arc::new(inner),
            flags: Arc::new(FailureFlags::default()),
        }
    }

    /// Make `create_router` fail while set.
    pub fn fail_create_router(&self, fail: bool) {
        self.flags.create_router.store(fail, Ordering::SeqCst);
    }

    /// Make `create_transport` fail while set.
    pub fn fail_create_transport(&self, fail: bool) {
        self.flags.create_transport.store(fail, Ordering::SeqCst);
    }

    /// Make transport `connect` fail while set.
    pub fn fail_connect(&self, fail: bool) {
        self.flags.connect.store(fail, Ordering::SeqCst);
    }

    /// Make `produce` fail while set.
    pub fn fail_produce(&self, fail: bool) {
        self.flags.produce.store(fail, Ordering::SeqCst);
    }

    /// Make `consume` fail while set.
    pub fn fail_consume(&self, fail: bool) {
        self.flags.consume.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<E: MediaEngine + 'static> MediaEngine for FlakyEngine<E> {
    async fn create_router(&self) -> Result<Arc<dyn RouterHandle>, EngineError> {
        self.flags.check(&self.flags.create_router, "create_router")?;
        let router = self.inner.create_router().await?;
        Ok(Arc::new(FlakyRouter {
            inner: router,
            flags: Arc::clone(&self.flags),
        }))
    }
}

struct FlakyRouter {
    inner: Arc<dyn RouterHandle>,
    flags: Arc<FailureFlags>,
}

#[async_trait]
impl RouterHandle for FlakyRouter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn capabilities(&self) -> Value {
        self.inner.capabilities()
    }

    async fn can_consume(&self, producer_id: &str, capabilities: &Value) -> bool {
        self.inner.can_consume(producer_id, capabilities).await
    }

    async fn create_transport(&self) -> Result<Arc<dyn TransportHandle>, EngineError> {
        self.flags
            .check(&self.flags.create_transport, "create_transport")?;
        let transport = self.inner.create_transport().await?;
        Ok(Arc::new(FlakyTransport {
            inner: transport,
            flags: Arc::clone(&self.flags),
        }))
    }
}

struct FlakyTransport {
    inner: Arc<dyn TransportHandle>,
    flags: Arc<FailureFlags>,
}

#[async_trait]
impl TransportHandle for FlakyTransport {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn connect_params(&self) -> Value {
        self.inner.connect_params()
    }

    async fn connect(&self, security: Value) -> Result<(), EngineError> {
        self.flags.check(&self.flags.connect, "connect")?;
        self.inner.connect(security).await
    }

    async fn produce(
        &self,
        kind: MediaKind,
        media_parameters: Value,
        app_data: Value,
    ) -> Result<Arc<dyn ProducerHandle>, EngineError> {
        self.flags.check(&self.flags.produce, "produce")?;
        self.inner.produce(kind, media_parameters, app_data).await
    }

    async fn consume(
        &self,
        producer_id: &str,
        capabilities: Value,
    ) -> Result<Arc<dyn ConsumerHandle>, EngineError> {
        self.flags.check(&self.flags.consume, "consume")?;
        self.inner.consume(producer_id, capabilities).await
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.inner.close().await
    }

    fn closed(&self) -> tokio_util::sync::CancellationToken {
        self.inner.closed()
    }
}
