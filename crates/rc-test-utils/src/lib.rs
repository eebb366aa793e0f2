//! # RC Test Utilities
//!
//! Shared test utilities for the Conclave Room Controller.
//!
//! This crate provides failure injection and test fixtures for isolated
//! coordinator testing without a real media engine:
//!
//! - [`flaky_engine`] - `FlakyEngine`, a failure-injecting wrapper around
//!   any media engine backend
//! - [`probe`] - `EventProbe`, assertion helpers over a connection's push
//!   channel
//! - [`fixtures`] - Pre-configured test data (rooms, peers)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::{EventProbe, FlakyEngine, TestRoom};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     // Engine that fails the next produce call
//!     let engine = FlakyEngine::wrap(LocalMediaEngine::new());
//!     engine.fail_produce(true);
//!
//!     let room = TestRoom::random();
//!
//!     // Drive the coordinator and assert on pushed events...
//! }
//! ```

pub mod fixtures;
pub mod flaky_engine;
pub mod probe;

pub use fixtures::{TestPeer, TestRoom};
pub use flaky_engine::FlakyEngine;
pub use probe::EventProbe;
