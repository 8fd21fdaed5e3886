//! Operator command queue.
//!
//! Commands are enqueued asynchronously from anywhere (UI, signal handler,
//! tests) through a [`LoopHandle`] and consumed by the control loop only at
//! the start of a cycle, so a command never takes effect mid-cycle.
//!
//! # Example
//!
//! ```rust
//! use autonav_middleware::command_channel;
//! use autonav_types::LoopCommand;
//!
//! let (handle, mut queue) = command_channel(8);
//! handle.start("r_04".into()).unwrap();
//! handle.pause().unwrap();
//!
//! let drained = queue.drain();
//! assert_eq!(drained.len(), 2);
//! assert_eq!(drained[1], LoopCommand::Pause);
//! ```

use autonav_types::{LoopCommand, NavError, RegionId};
use tokio::sync::mpsc;
use tracing::debug;

/// Create a bounded command queue and its first handle.
pub fn command_channel(capacity: usize) -> (LoopHandle, CommandQueue) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (LoopHandle { sender }, CommandQueue { receiver })
}

/// Cloneable sender side.  All methods are non-blocking.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    sender: mpsc::Sender<LoopCommand>,
}

impl LoopHandle {
    /// Enqueue `command`.
    ///
    /// # Errors
    ///
    /// [`NavError::Channel`] when the queue is full or the loop is gone.
    pub fn send(&self, command: LoopCommand) -> Result<(), NavError> {
        debug!(?command, "command enqueued");
        self.sender
            .try_send(command)
            .map_err(|e| NavError::Channel(format!("command queue: {e}")))
    }

    pub fn start(&self, goal: RegionId) -> Result<(), NavError> {
        self.send(LoopCommand::Start { goal })
    }

    pub fn pause(&self) -> Result<(), NavError> {
        self.send(LoopCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), NavError> {
        self.send(LoopCommand::Resume)
    }

    pub fn stop(&self) -> Result<(), NavError> {
        self.send(LoopCommand::Stop)
    }

    /// `true` once the control loop has dropped its queue.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving side, owned by the control loop.
#[derive(Debug)]
pub struct CommandQueue {
    receiver: mpsc::Receiver<LoopCommand>,
}

impl CommandQueue {
    /// Take every command currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<LoopCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.receiver.try_recv() {
            commands.push(command);
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_empties_queue() {
        let (handle, mut queue) = command_channel(4);
        handle.start("a".into()).unwrap();
        handle.pause().unwrap();
        handle.resume().unwrap();
        assert_eq!(
            queue.drain(),
            vec![
                LoopCommand::Start { goal: "a".into() },
                LoopCommand::Pause,
                LoopCommand::Resume,
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn full_queue_reports_channel_error() {
        let (handle, _queue) = command_channel(1);
        handle.stop().unwrap();
        assert!(matches!(handle.stop(), Err(NavError::Channel(_))));
    }

    #[test]
    fn dropped_queue_closes_handles() {
        let (handle, queue) = command_channel(1);
        let clone = handle.clone();
        drop(queue);
        assert!(clone.is_closed());
        assert!(handle.pause().is_err());
    }
}
