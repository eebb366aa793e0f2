//! Room Controller error types.
//!
//! Error types map to wire `ErrorClass` values for client responses.
//! Internal details are logged server-side but not exposed to clients.

use crate::engine::EngineError;
use thiserror::Error;

/// Room Controller error type.
///
/// Maps to wire `ErrorClass` values:
/// - `NotJoined`, `TransportNotReady`: `PRECONDITION` (1)
/// - `IncompatibleCapabilities`: `CANNOT_CONSUME` (2)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `RoomNotFound`, `ProducerNotFound`: `NOT_FOUND` (4)
/// - `AlreadyJoined`: `CONFLICT` (5)
/// - `Engine`, `Internal`: `ENGINE_FAILURE` (6)
/// - `RoomAtCapacity`, `AtCapacity`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum RcError {
    /// The request requires room membership the connection does not have.
    #[error("Not joined to a room")]
    NotJoined,

    /// The connection already joined a room; one room per connection.
    #[error("Already joined a room")]
    AlreadyJoined,

    /// The session is not allowed to perform the requested action.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Producer not found in the registry.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// The media engine refused the requester's capabilities for this producer.
    #[error("Cannot consume producer")]
    IncompatibleCapabilities,

    /// The request needs a transport that has not been created yet.
    #[error("Transport not ready")]
    TransportNotReady,

    /// The room is at its configured peer limit.
    #[error("Room at capacity: {0}")]
    RoomAtCapacity(String),

    /// The controller is at its configured room limit (load shedding).
    #[error("Controller at capacity")]
    AtCapacity,

    /// The controller is draining (graceful shutdown).
    #[error("Controller is draining")]
    Draining,

    /// The external media engine failed.
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    /// Internal error (actor mailbox/reply plumbing).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the wire `ErrorClass` value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RcError::NotJoined | RcError::TransportNotReady => 1, // PRECONDITION
            RcError::IncompatibleCapabilities => 2,               // CANNOT_CONSUME
            RcError::PermissionDenied(_) => 3,                    // FORBIDDEN
            RcError::RoomNotFound(_) | RcError::ProducerNotFound(_) => 4, // NOT_FOUND
            RcError::AlreadyJoined => 5,                          // CONFLICT
            RcError::Engine(_) | RcError::Internal(_) => 6,       // ENGINE_FAILURE
            RcError::RoomAtCapacity(_) | RcError::AtCapacity | RcError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::NotJoined => "Not joined to a room".to_string(),
            RcError::AlreadyJoined => "Already joined a room".to_string(),
            RcError::PermissionDenied(msg) => msg.clone(),
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::ProducerNotFound(_) => "Producer not found".to_string(),
            RcError::IncompatibleCapabilities => "Cannot consume producer".to_string(),
            RcError::TransportNotReady => "Transport not ready".to_string(),
            RcError::RoomAtCapacity(_) => "Room is at capacity".to_string(),
            RcError::AtCapacity => "Server is at capacity, please try again".to_string(),
            RcError::Draining => "Server is shutting down".to_string(),
            RcError::Engine(_) | RcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
