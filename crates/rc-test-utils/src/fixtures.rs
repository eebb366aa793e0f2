//! Pre-configured test data fixtures.

use uuid::Uuid;

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room ID.
    pub id: String,
}

impl TestRoom {
    /// Create a test room with the given ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Create a test room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }
}

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    /// Display name.
    pub name: String,
}

impl TestPeer {
    /// Create a test peer with the given display name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Create a test peer with a random display name.
    #[must_use]
    pub fn random() -> Self {
        let suffix = Uuid::new_v4().to_string();
        Self::new(format!("peer-{}", suffix.get(..8).unwrap_or("00000000")))
    }
}
