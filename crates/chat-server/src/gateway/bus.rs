//! Broadcast groups
//!
//! One group per conversation (`conversation-{id}`). `GroupBus` is the seam
//! a broker-backed implementation would plug into for multi-instance
//! deployments; `LocalGroupBus` keeps groups in process memory.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::{ConversationId, Message};

pub type GroupEvent = Arc<Message>;

pub fn group_name(conversation_id: ConversationId) -> String {
    format!("conversation-{}", conversation_id)
}

#[async_trait]
pub trait GroupBus: Send + Sync {
    /// Receive every event published to the group from now on
    fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<GroupEvent>;

    /// Deliver an event to current members, returning how many received it
    async fn publish(&self, conversation_id: ConversationId, event: GroupEvent) -> usize;

    /// Give up a subscription, closing the group once nobody is left in it
    fn unsubscribe(&self, conversation_id: ConversationId, rx: broadcast::Receiver<GroupEvent>);

    /// Number of live subscriptions on the group
    fn members(&self, conversation_id: ConversationId) -> usize;

    /// Number of groups that currently hold a channel
    fn group_count(&self) -> usize;
}

/// In-process groups backed by tokio broadcast channels
pub struct LocalGroupBus {
    capacity: usize,
    channels: RwLock<HashMap<ConversationId, broadcast::Sender<GroupEvent>>>,
}

impl LocalGroupBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn prune(&self, conversation_id: ConversationId) {
        let mut channels = self.channels.write();
        if channels
            .get(&conversation_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&conversation_id);
            debug!("[Gateway] Closed idle group {}", group_name(conversation_id));
        }
    }
}

#[async_trait]
impl GroupBus for LocalGroupBus {
    fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<GroupEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(conversation_id)
            .or_insert_with(|| {
                debug!("[Gateway] Opening group {}", group_name(conversation_id));
                broadcast::channel(self.capacity).0
            })
            .subscribe()
    }

    async fn publish(&self, conversation_id: ConversationId, event: GroupEvent) -> usize {
        let tx = self.channels.read().get(&conversation_id).cloned();
        let Some(tx) = tx else {
            return 0;
        };

        match tx.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                self.prune(conversation_id);
                0
            }
        }
    }

    fn unsubscribe(&self, conversation_id: ConversationId, rx: broadcast::Receiver<GroupEvent>) {
        drop(rx);
        self.prune(conversation_id);
    }

    fn members(&self, conversation_id: ConversationId) -> usize {
        self.channels
            .read()
            .get(&conversation_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    fn group_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Participant;
    use chrono::Utc;

    fn message(conversation_id: ConversationId, content: &str) -> GroupEvent {
        Arc::new(Message {
            id: 1,
            conversation_id,
            sender: Participant {
                id: 1,
                username: "alice".into(),
            },
            content: content.into(),
            sent_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_publish_without_members_reaches_nobody() {
        let bus = LocalGroupBus::new(8);
        assert_eq!(bus.publish(10, message(10, "lost")).await, 0);
        assert_eq!(bus.group_count(), 0);
    }

    #[tokio::test]
    async fn test_members_receive_only_their_group() {
        let bus = LocalGroupBus::new(8);
        let mut ten = bus.subscribe(10);
        let mut eleven = bus.subscribe(11);
        assert_eq!(bus.members(10), 1);

        assert_eq!(bus.publish(10, message(10, "for ten")).await, 1);

        assert_eq!(ten.recv().await.unwrap().content, "for ten");
        assert!(eleven.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_idle_group_is_dropped_after_last_member_leaves() {
        let bus = LocalGroupBus::new(8);
        let rx = bus.subscribe(10);
        assert_eq!(bus.group_count(), 1);
        drop(rx);

        assert_eq!(bus.publish(10, message(10, "echo")).await, 0);
        assert_eq!(bus.group_count(), 0);
        assert_eq!(bus.members(10), 0);
    }

    #[test]
    fn test_unsubscribe_closes_group_with_last_member() {
        let bus = LocalGroupBus::new(8);
        let first = bus.subscribe(10);
        let second = bus.subscribe(10);

        bus.unsubscribe(10, first);
        assert_eq!(bus.group_count(), 1);
        assert_eq!(bus.members(10), 1);

        bus.unsubscribe(10, second);
        assert_eq!(bus.group_count(), 0);
    }

    #[test]
    fn test_group_name() {
        assert_eq!(group_name(10), "conversation-10");
    }
}
