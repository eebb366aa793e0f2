//! Actor model implementation.
//!
//! The coordinator uses a three-level actor hierarchy:
//!
//! ```text
//! RoomDirectoryActor (singleton per controller instance)
//! ├── supervises N RoomActors
//! │   └── RoomActor (one per room)
//! │       └── owns all room state and per-session stream records
//! └── ConnectionActor (one per client connection, push channel)
//! ```
//!
//! All communication is typed message passing over `tokio::sync::mpsc`
//! mailboxes with `oneshot` reply channels; cancellation flows down a
//! `CancellationToken` tree rooted at the directory.

pub mod connection;
pub mod directory;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use directory::{DirectoryLimits, RoomDirectoryActorHandle};
pub use messages::{
    ConsumeResult, DirectoryStatus, JoinResult, RoomSnapshot, TransportDirection,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::RoomActorHandle;
