//! Outgoing command queue
//!
//! Commands wait here until the emit loop writes them. Delivery is at least once: the head is
//! only removed after its write succeeded.

use crate::protocol::GatewayCommand;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use thiserror::Error;

/// Queue error type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("outgoing queue is full ({capacity} commands)")]
    Full { capacity: usize },
}

/// A queued command with the id used to confirm its delivery
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingCommand {
    pub id: u64,
    pub command: GatewayCommand,
}

/// FIFO of commands not yet written
#[derive(Debug)]
pub struct OutgoingQueue {
    entries: VecDeque<OutgoingCommand>,
    /// `None` means unbounded
    capacity: Option<usize>,
    next_id: u64,
}

impl OutgoingQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            next_id: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Queue a command
    ///
    /// Commands whose op replaces queued ones overwrite an existing entry of the same op
    /// and only append when there is none.
    pub fn add(&mut self, command: GatewayCommand) -> Result<(), QueueError> {
        let command = if command.op().replaces_queued() {
            match self.add_by_overwrite(command) {
                None => return Ok(()),
                Some(command) => command,
            }
        } else {
            command
        };

        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }

        let id = self.next_id();
        self.entries.push_back(OutgoingCommand { id, command });
        Ok(())
    }

    /// Replace the first queued command with the same op
    ///
    /// Hands the command back when nothing was replaced. The replacement gets a fresh id so a
    /// write of the old value still in flight does not remove it.
    pub fn add_by_overwrite(&mut self, command: GatewayCommand) -> Option<GatewayCommand> {
        let op = command.op();
        let Some(index) = self.entries.iter().position(|e| e.command.op() == op) else {
            return Some(command);
        };
        let id = self.next_id();
        self.entries[index] = OutgoingCommand { id, command };
        None
    }

    pub fn front(&self) -> Option<&OutgoingCommand> {
        self.entries.front()
    }

    /// Remove the head if it is still the entry `id`
    pub fn complete(&mut self, id: u64) -> bool {
        if self.entries.front().is_some_and(|e| e.id == id) {
            self.entries.pop_front();
            return true;
        }
        false
    }

    /// Remove and return everything queued
    pub fn steal(&mut self) -> Vec<GatewayCommand> {
        self.entries.drain(..).map(|e| e.command).collect()
    }

    pub fn snapshot(&self) -> Vec<GatewayCommand> {
        self.entries.iter().map(|e| e.command.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An [`OutgoingQueue`] shared between the emitting caller and the emit loop
#[derive(Debug)]
pub struct SharedQueue {
    inner: Mutex<OutgoingQueue>,
}

impl SharedQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(OutgoingQueue::new(capacity)),
        }
    }

    pub fn add(&self, command: GatewayCommand) -> Result<(), QueueError> {
        self.inner.lock().add(command)
    }

    /// Try to deliver the head through `write`
    ///
    /// The lock is not held during the write. Returns `Ok(false)` when the queue is empty; on
    /// a failed write the head stays where it is.
    pub async fn try_send<F, Fut, E>(&self, write: F) -> Result<bool, E>
    where
        F: FnOnce(GatewayCommand) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let head = self.inner.lock().front().cloned();
        let Some(OutgoingCommand { id, command }) = head else {
            return Ok(false);
        };

        write(command).await?;
        self.inner.lock().complete(id);
        Ok(true)
    }

    pub fn steal(&self) -> Vec<GatewayCommand> {
        self.inner.lock().steal()
    }

    pub fn snapshot(&self) -> Vec<GatewayCommand> {
        self.inner.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RequestGuildMembersPayload, UpdatePresencePayload};
    use switchboard_core::Snowflake;

    fn presence(status: &str) -> GatewayCommand {
        GatewayCommand::from(UpdatePresencePayload::status(status))
    }

    fn members(guild: u64) -> GatewayCommand {
        GatewayCommand::from(RequestGuildMembersPayload::all_members(vec![Snowflake::new(guild)]))
    }

    #[test]
    fn test_overwrite_keeps_single_latest_entry() {
        let mut queue = OutgoingQueue::unbounded();
        queue.add(presence("idle")).unwrap();
        queue.add(presence("dnd")).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().unwrap().command, presence("dnd"));
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut queue = OutgoingQueue::unbounded();
        queue.add(members(1)).unwrap();
        queue.add(presence("idle")).unwrap();
        queue.add(members(2)).unwrap();
        queue.add(presence("online")).unwrap();

        assert_eq!(
            queue.snapshot(),
            vec![members(1), presence("online"), members(2)]
        );
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut queue = OutgoingQueue::new(Some(2));
        queue.add(members(1)).unwrap();
        queue.add(members(2)).unwrap();

        assert_eq!(queue.add(members(3)), Err(QueueError::Full { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_overwrite_succeeds_on_full_queue() {
        let mut queue = OutgoingQueue::new(Some(1));
        queue.add(presence("idle")).unwrap();
        queue.add(presence("online")).unwrap();
        assert_eq!(queue.snapshot(), vec![presence("online")]);
    }

    #[test]
    fn test_complete_only_pops_matching_head() {
        let mut queue = OutgoingQueue::unbounded();
        queue.add(presence("idle")).unwrap();
        let stale = queue.front().unwrap().id;

        queue.add(presence("dnd")).unwrap();
        assert!(!queue.complete(stale));
        assert_eq!(queue.len(), 1);

        let current = queue.front().unwrap().id;
        assert!(queue.complete(current));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_steal_empties_queue() {
        let mut queue = OutgoingQueue::unbounded();
        queue.add(members(1)).unwrap();
        queue.add(members(2)).unwrap();

        assert_eq!(queue.steal(), vec![members(1), members(2)]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_try_send_keeps_head_on_failure() {
        let queue = SharedQueue::new(None);
        queue.add(members(1)).unwrap();
        queue.add(members(2)).unwrap();

        let failed: Result<bool, &str> = queue.try_send(|_| async { Err("socket gone") }).await;
        assert!(failed.is_err());
        assert_eq!(queue.len(), 2);

        let mut written = Vec::new();
        let sent: Result<bool, &str> = queue
            .try_send(|command| {
                written.push(command);
                async { Ok(()) }
            })
            .await;
        assert_eq!(sent, Ok(true));
        assert_eq!(written, vec![members(1)]);
        assert_eq!(queue.snapshot(), vec![members(2)]);
    }

    #[tokio::test]
    async fn test_try_send_on_empty_queue() {
        let queue = SharedQueue::new(None);
        let sent: Result<bool, ()> = queue.try_send(|_| async { Ok(()) }).await;
        assert_eq!(sent, Ok(false));
    }
}
