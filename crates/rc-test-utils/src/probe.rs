//! Push-event assertion helpers.

use room_controller::signaling::ServerEvent;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait for an expected event before the test fails.
const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Wraps a connection's push channel with assertion helpers.
pub struct EventProbe {
    receiver: mpsc::Receiver<ServerEvent>,
}

impl EventProbe {
    /// Build a probe and the sender to hand to the session under test.
    pub fn channel(buffer: usize) -> (mpsc::Sender<ServerEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { receiver: rx })
    }

    /// Wrap an existing receiver.
    pub fn new(receiver: mpsc::Receiver<ServerEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event, panicking if none arrives in time.
    pub async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.receiver.recv())
            .await
            .expect("timed out waiting for push event")
            .expect("push channel closed")
    }

    /// Skip events until one matches, panicking on timeout.
    pub async fn expect_matching<F>(&mut self, mut matcher: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let event = self.receiver.recv().await.expect("push channel closed");
                if matcher(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected push event not delivered")
    }

    /// Drain every event currently queued.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Assert that no further event is queued right now.
    pub fn assert_quiet(&mut self) {
        if let Ok(event) = self.receiver.try_recv() {
            panic!("expected no queued push events, found {event:?}");
        }
    }
}
