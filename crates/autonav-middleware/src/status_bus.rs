//! Per-cycle status fan-out.
//!
//! The control loop publishes exactly one [`StatusSnapshot`] per cycle.
//! Subscribers get every snapshot through a [`tokio::sync::broadcast`]
//! channel (slow subscribers lag and skip, they never block the loop);
//! [`StatusBus::latest`] offers the most recent one without subscribing.

use autonav_types::StatusSnapshot;
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Snapshots buffered per subscriber before the oldest are dropped.
const DEFAULT_CAPACITY: usize = 64;

/// Shared status bus.  Clones share the same channels.
#[derive(Clone, Debug)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusSnapshot>,
    latest: watch::Sender<StatusSnapshot>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(StatusSnapshot::initial());
        Self { sender, latest }
    }

    /// Publish `snapshot` to every subscriber.
    ///
    /// Returns the number of subscribers that were handed the snapshot;
    /// `0` when nobody is listening, which is normal for a headless run.
    pub fn publish(&self, snapshot: StatusSnapshot) -> usize {
        self.latest.send_replace(snapshot.clone());
        self.sender.send(snapshot).unwrap_or(0)
    }

    pub fn subscribe(&self) -> StatusSubscriber {
        StatusSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> StatusSnapshot {
        self.latest.borrow().clone()
    }

    /// A receiver that is notified whenever a new snapshot lands.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.latest.subscribe()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of the status bus.
pub struct StatusSubscriber {
    receiver: broadcast::Receiver<StatusSnapshot>,
}

impl StatusSubscriber {
    /// Wait for the next snapshot.  Skips over lagged snapshots and returns
    /// `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<StatusSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "status subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`StatusSubscriber::next`].
    pub fn try_next(&mut self) -> Option<StatusSnapshot> {
        loop {
            match self.receiver.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
