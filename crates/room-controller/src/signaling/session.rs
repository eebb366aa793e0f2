//! Per-connection signaling session.
//!
//! One `SignalingSession` lives for the duration of one client connection.
//! The embedding transport feeds it decoded [`ClientRequest`]s and drains
//! the push-event channel it was constructed with; the session validates,
//! routes to the directory/room actors, and maps errors to wire payloads.
//!
//! Every request gets exactly one [`ServerResponse`]. Fire-and-forget
//! requests (`producerClose`, `promoteToProducer`, `forceStopProducer`,
//! `resume`) acknowledge even when authorization fails; the caller simply
//! observes no state change and no broadcast.

use crate::actors::{
    ActorMetrics, ConnectionActor, ConnectionActorHandle, RoomActorHandle,
    RoomDirectoryActorHandle, TransportDirection,
};
use crate::errors::RcError;

use super::messages::{ClientRequest, ServerEvent, ServerResponse};

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-connection protocol handler.
pub struct SignalingSession {
    /// Opaque connection identifier, minted when the connection is accepted.
    connection_id: String,
    /// Directory used to resolve rooms on join.
    directory: RoomDirectoryActorHandle,
    /// This connection's push channel.
    connection: ConnectionActorHandle,
    /// The joined room, if any. One room per connection.
    room: Option<RoomActorHandle>,
    /// Whether disconnect cleanup already ran.
    disconnected: bool,
}

impl SignalingSession {
    /// Create a session for a freshly accepted connection.
    ///
    /// `events` is the outbound push channel: the transport drains it to
    /// the wire in order. The session spawns the connection actor that
    /// feeds it.
    #[must_use]
    pub fn new(
        directory: RoomDirectoryActorHandle,
        events: mpsc::Sender<ServerEvent>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let connection_id = format!("conn-{}", Uuid::new_v4());
        let (connection, _task) = ConnectionActor::spawn(
            connection_id.clone(),
            events,
            directory.child_token(),
            metrics,
        );

        info!(
            target: "rc.signaling",
            connection_id = %connection_id,
            "Client connected"
        );

        Self {
            connection_id,
            directory,
            connection,
            room: None,
            disconnected: false,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The joined room id, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(RoomActorHandle::room_id)
    }

    /// Dispatch one request and produce its single response.
    #[instrument(skip_all, name = "rc.signaling", fields(connection_id = %self.connection_id))]
    pub async fn handle_request(&mut self, request: ClientRequest) -> ServerResponse {
        match request {
            ClientRequest::JoinRoom {
                room_id,
                display_name,
            } => self.handle_join(room_id, display_name).await,

            ClientRequest::CreateProducerTransport { .. } => {
                self.handle_create_transport(TransportDirection::Producer)
                    .await
            }

            ClientRequest::CreateConsumerTransport { .. } => {
                self.handle_create_transport(TransportDirection::Consumer)
                    .await
            }

            ClientRequest::ConnectProducerTransport { security } => {
                self.handle_connect_transport(TransportDirection::Producer, security)
                    .await
            }

            ClientRequest::ConnectConsumerTransport { security } => {
                self.handle_connect_transport(TransportDirection::Consumer, security)
                    .await
            }

            ClientRequest::Produce {
                kind,
                media_parameters,
                app_data,
            } => match &self.room {
                None => ServerResponse::from_error(&RcError::NotJoined),
                Some(room) => match room
                    .produce(self.connection_id.clone(), kind, media_parameters, app_data)
                    .await
                {
                    Ok(producer_id) => ServerResponse::Produced { producer_id },
                    Err(e) => ServerResponse::from_error(&e),
                },
            },

            ClientRequest::Consume {
                producer_id,
                capabilities,
            } => match &self.room {
                None => ServerResponse::from_error(&RcError::NotJoined),
                Some(room) => match room
                    .consume(self.connection_id.clone(), producer_id, capabilities)
                    .await
                {
                    Ok(result) => ServerResponse::Consumed {
                        consumer_id: result.consumer_id,
                        producer_id: result.producer_id,
                        kind: result.kind,
                        media_parameters: result.media_parameters,
                        app_data: result.app_data,
                    },
                    Err(e) => ServerResponse::from_error(&e),
                },
            },

            // Fire-and-acknowledge from here on: authorization failures and
            // unknown ids resolve silently, never as error payloads.
            ClientRequest::Resume { consumer_id } => {
                if let Some(room) = &self.room {
                    self.log_if_plumbing_failure(
                        "resume",
                        room.resume(self.connection_id.clone(), consumer_id).await,
                    );
                }
                ServerResponse::Ack
            }

            ClientRequest::ProducerClose { producer_id } => {
                if let Some(room) = &self.room {
                    self.log_if_plumbing_failure(
                        "producerClose",
                        room.close_producer(self.connection_id.clone(), producer_id)
                            .await,
                    );
                }
                ServerResponse::Ack
            }

            ClientRequest::PromoteToProducer { target_peer_id } => {
                if let Some(room) = &self.room {
                    self.log_if_plumbing_failure(
                        "promoteToProducer",
                        room.promote_peer(self.connection_id.clone(), target_peer_id)
                            .await,
                    );
                }
                ServerResponse::Ack
            }

            ClientRequest::ForceStopProducer { producer_id } => {
                if let Some(room) = &self.room {
                    self.log_if_plumbing_failure(
                        "forceStopProducer",
                        room.force_stop_producer(self.connection_id.clone(), producer_id)
                            .await,
                    );
                }
                ServerResponse::Ack
            }
        }
    }

    /// The connection's channel terminated. Reclaims everything this
    /// session owned; safe to call more than once.
    #[instrument(skip_all, fields(connection_id = %self.connection_id))]
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;

        info!(
            target: "rc.signaling",
            connection_id = %self.connection_id,
            "Client disconnected"
        );

        if let Some(room) = self.room.take() {
            if let Err(e) = room.disconnect(self.connection_id.clone()).await {
                warn!(
                    target: "rc.signaling",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Disconnect cleanup did not complete"
                );
            }
        }

        self.connection.cancel();
    }

    async fn handle_join(&mut self, room_id: String, display_name: String) -> ServerResponse {
        if self.room.is_some() {
            return ServerResponse::from_error(&RcError::AlreadyJoined);
        }

        let room = match self.directory.get_or_create_room(room_id).await {
            Ok(room) => room,
            Err(e) => return ServerResponse::from_error(&e),
        };

        match room
            .join(
                self.connection_id.clone(),
                display_name,
                self.connection.clone(),
            )
            .await
        {
            Ok(result) => {
                debug!(
                    target: "rc.signaling",
                    connection_id = %self.connection_id,
                    room_id = %room.room_id(),
                    is_host = result.is_host,
                    "Join completed"
                );
                self.room = Some(room);
                ServerResponse::Joined {
                    routing_capabilities: result.routing_capabilities,
                    existing_producers: result.existing_producers,
                    is_host: result.is_host,
                    can_produce: result.can_produce,
                }
            }
            Err(e) => ServerResponse::from_error(&e),
        }
    }

    async fn handle_create_transport(&mut self, direction: TransportDirection) -> ServerResponse {
        match &self.room {
            None => ServerResponse::from_error(&RcError::NotJoined),
            Some(room) => match room
                .create_transport(self.connection_id.clone(), direction)
                .await
            {
                Ok(params) => ServerResponse::TransportCreated { params },
                Err(e) => ServerResponse::from_error(&e),
            },
        }
    }

    async fn handle_connect_transport(
        &mut self,
        direction: TransportDirection,
        security: Value,
    ) -> ServerResponse {
        match &self.room {
            None => ServerResponse::from_error(&RcError::NotJoined),
            Some(room) => match room
                .connect_transport(self.connection_id.clone(), direction, security)
                .await
            {
                Ok(()) => ServerResponse::Ack,
                Err(e) => ServerResponse::from_error(&e),
            },
        }
    }

    /// Fire-and-forget paths only surface actor plumbing failures, and only
    /// into the log.
    fn log_if_plumbing_failure(&self, operation: &str, result: Result<(), RcError>) {
        if let Err(e) = result {
            warn!(
                target: "rc.signaling",
                connection_id = %self.connection_id,
                operation = operation,
                error = %e,
                "Fire-and-forget request did not reach the room actor"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::DirectoryLimits;
    use crate::engine::local::LocalMediaEngine;
    use crate::registry::ProducerRegistry;
    use serde_json::json;

    struct Harness {
        directory: RoomDirectoryActorHandle,
        metrics: Arc<ActorMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            let metrics = ActorMetrics::new();
            let directory = RoomDirectoryActorHandle::new(
                "rc-session-test".to_string(),
                Arc::new(LocalMediaEngine::new()),
                Arc::new(ProducerRegistry::new()),
                Arc::clone(&metrics),
                DirectoryLimits {
                    max_rooms: 16,
                    max_peers_per_room: 8,
                },
            );
            Self { directory, metrics }
        }

        fn session(&self) -> (SignalingSession, mpsc::Receiver<ServerEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let session =
                SignalingSession::new(self.directory.clone(), tx, Arc::clone(&self.metrics));
            (session, rx)
        }
    }

    fn join_request(room_id: &str, name: &str) -> ClientRequest {
        ClientRequest::JoinRoom {
            room_id: room_id.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_assigns_host_then_viewer() {
        let harness = Harness::new();
        let (mut alice, _rx_a) = harness.session();
        let (mut bob, _rx_b) = harness.session();

        let response = alice.handle_request(join_request("r1", "Alice")).await;
        match response {
            ServerResponse::Joined {
                is_host,
                can_produce,
                existing_producers,
                ..
            } => {
                assert!(is_host);
                assert!(can_produce);
                assert!(existing_producers.is_empty());
            }
            other => panic!("unexpected response: {other:?}"),
        }

        let response = bob.handle_request(join_request("r1", "Bob")).await;
        match response {
            ServerResponse::Joined {
                is_host,
                can_produce,
                ..
            } => {
                assert!(!is_host);
                assert!(!can_produce);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        assert_eq!(alice.room_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_second_join_is_conflict() {
        let harness = Harness::new();
        let (mut alice, _rx) = harness.session();

        let _ = alice.handle_request(join_request("r1", "Alice")).await;
        let response = alice.handle_request(join_request("r2", "Alice")).await;

        match response {
            ServerResponse::Error { error } => assert_eq!(error.code, 5),
            other => panic!("unexpected response: {other:?}"),
        }
        // Still joined to the first room
        assert_eq!(alice.room_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_requests_before_join_are_precondition_errors() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();

        for request in [
            ClientRequest::CreateProducerTransport {
                capabilities: json!({}),
            },
            ClientRequest::ConnectConsumerTransport { security: json!({}) },
            ClientRequest::Produce {
                kind: crate::engine::MediaKind::Audio,
                media_parameters: json!({}),
                app_data: json!({}),
            },
            ClientRequest::Consume {
                producer_id: "p1".to_string(),
                capabilities: json!({}),
            },
        ] {
            let response = session.handle_request(request).await;
            match response {
                ServerResponse::Error { error } => assert_eq!(error.code, 1),
                other => panic!("unexpected response: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_fire_and_forget_before_join_acks() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();

        for request in [
            ClientRequest::Resume {
                consumer_id: "c1".to_string(),
            },
            ClientRequest::ProducerClose {
                producer_id: "p1".to_string(),
            },
            ClientRequest::PromoteToProducer {
                target_peer_id: "conn-x".to_string(),
            },
            ClientRequest::ForceStopProducer {
                producer_id: "p1".to_string(),
            },
        ] {
            let response = session.handle_request(request).await;
            assert!(matches!(response, ServerResponse::Ack));
        }
    }

    #[tokio::test]
    async fn test_full_publish_flow() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();

        let _ = session.handle_request(join_request("r1", "Alice")).await;

        let response = session
            .handle_request(ClientRequest::CreateProducerTransport {
                capabilities: json!({}),
            })
            .await;
        assert!(matches!(response, ServerResponse::TransportCreated { .. }));

        let response = session
            .handle_request(ClientRequest::ConnectProducerTransport {
                security: json!({"fingerprint": "ab:cd"}),
            })
            .await;
        assert!(matches!(response, ServerResponse::Ack));

        let response = session
            .handle_request(ClientRequest::Produce {
                kind: crate::engine::MediaKind::Video,
                media_parameters: json!({"codecs": []}),
                app_data: json!({"source": "camera"}),
            })
            .await;
        match response {
            ServerResponse::Produced { producer_id } => {
                assert!(!producer_id.is_empty());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_before_create_is_transport_not_ready() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();

        let _ = session.handle_request(join_request("r1", "Alice")).await;

        let response = session
            .handle_request(ClientRequest::ConnectProducerTransport { security: json!({}) })
            .await;
        match response {
            ServerResponse::Error { error } => {
                assert_eq!(error.code, 1);
                assert_eq!(error.message, "Transport not ready");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();

        let _ = session.handle_request(join_request("r1", "Alice")).await;
        session.disconnect().await;
        session.disconnect().await;

        let room = harness
            .directory
            .get_or_create_room("r1".to_string())
            .await
            .unwrap();
        let snapshot = room.snapshot().await.unwrap();
        assert!(snapshot.peers.is_empty());
    }
}
