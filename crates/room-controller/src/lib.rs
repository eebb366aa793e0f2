//! Room Controller (RC) Service Library
//!
//! This library provides the core functionality of the Conclave Room
//! Controller - the signaling coordinator for multi-party real-time media
//! sessions. It is responsible for:
//!
//! - Room lifecycle: lazy creation on first join, one router capability per
//!   room, rooms kept resolvable for reconnection
//! - Peer role and permission state: first joiner becomes host, host-driven
//!   promotion, publish gating
//! - Producer/consumer registries with exactly-once reclaim on every exit
//!   path (explicit close, forced stop, disconnect, engine-side closure)
//! - Consistent membership and stream-lifecycle broadcasts to all peers
//!
//! The actual media engine (ICE/DTLS negotiation, RTP forwarding) is an
//! external collaborator behind the [`engine`] capability traits; the
//! physical client message channel is the embedder's concern and is driven
//! through [`signaling::SignalingSession`].
//!
//! # Architecture
//!
//! The coordinator uses an actor model hierarchy:
//!
//! ```text
//! RoomDirectoryActor (singleton per controller instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per room)
//! │       └── owns room state: peers, roles, transports, stream records
//! └── ConnectionActor (one per client connection, ordered push channel)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One room per connection**: a user in two rooms has two connections
//! - **Single-writer rooms**: all mutations of one room serialize through
//!   its actor, closing the double-router race on concurrent first-joins
//! - **Permission is monotone**: publish permission is granted, never
//!   revoked; a forced stop closes streams but leaves the flag set
//! - **In-memory only**: all state is scoped to the process lifetime
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`engine`] - Media engine capability traits and the local backend
//! - [`registry`] - Process-wide producer registry
//! - [`signaling`] - Wire types and the per-connection dispatcher
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error classes
//! - [`observability`] - Health endpoints

pub mod actors;
pub mod config;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod signaling;
