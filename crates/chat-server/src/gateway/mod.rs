//! Realtime gateway
//!
//! Each live connection gets a [`Session`]. Joining a conversation spawns a
//! forwarder from the conversation's broadcast group into the session's
//! outbox; leaving or disconnecting aborts it. Nothing here is acknowledged:
//! a participant who is not joined when a message is broadcast only sees it
//! on the next history fetch.

pub mod bus;
pub mod events;
pub mod socket;

pub use bus::{group_name, GroupBus, GroupEvent, LocalGroupBus};
pub use events::{ClientEvent, ServerEvent};
pub use socket::ws_handler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ConversationId, Message, MessageStore, UserId};
use crate::error::Result;

pub struct Gateway {
    messages: Arc<MessageStore>,
    bus: Arc<dyn GroupBus>,
    outbox_capacity: usize,
    next_connection_id: AtomicU64,
    live_connections: AtomicUsize,
}

impl Gateway {
    pub fn new(messages: Arc<MessageStore>, bus: Arc<dyn GroupBus>, outbox_capacity: usize) -> Self {
        Self {
            messages,
            bus,
            outbox_capacity: outbox_capacity.max(1),
            next_connection_id: AtomicU64::new(1),
            live_connections: AtomicUsize::new(0),
        }
    }

    /// Register a new connection. The receiver yields every event that
    /// should be written to the client.
    pub fn connect(self: &Arc<Self>) -> (Session, mpsc::Receiver<ServerEvent>) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let live = self.live_connections.fetch_add(1, Ordering::Relaxed) + 1;
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);

        info!("[Gateway] Connection {} opened ({} live)", id, live);

        let session = Session {
            id,
            gateway: self.clone(),
            outbox,
            memberships: HashMap::new(),
        };
        (session, rx)
    }

    /// Broadcast an already stored message to its conversation group
    pub async fn publish(&self, message: &Message) -> usize {
        let delivered = self
            .bus
            .publish(message.conversation_id, Arc::new(message.clone()))
            .await;
        debug!(
            "[Gateway] Message {} broadcast to {} ({} connections)",
            message.id,
            group_name(message.conversation_id),
            delivered
        );
        delivered
    }

    /// Connections currently joined to a conversation
    pub fn members(&self, conversation_id: ConversationId) -> usize {
        self.bus.members(conversation_id)
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections.load(Ordering::Relaxed)
    }

    /// Conversation groups with at least one member
    pub fn open_groups(&self) -> usize {
        self.bus.group_count()
    }
}

/// A forwarder's hold on a group. Dropping it, including when the forwarder
/// is aborted, hands the receiver back to the bus.
struct Subscription {
    bus: Arc<dyn GroupBus>,
    conversation_id: ConversationId,
    rx: Option<broadcast::Receiver<GroupEvent>>,
}

impl Subscription {
    fn new(bus: Arc<dyn GroupBus>, conversation_id: ConversationId) -> Self {
        let rx = bus.subscribe(conversation_id);
        Self {
            bus,
            conversation_id,
            rx: Some(rx),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.bus.unsubscribe(self.conversation_id, rx);
        }
    }
}

/// One client connection and the groups it has joined
pub struct Session {
    id: u64,
    gateway: Arc<Gateway>,
    outbox: mpsc::Sender<ServerEvent>,
    memberships: HashMap<ConversationId, JoinHandle<()>>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_member(&self, conversation_id: ConversationId) -> bool {
        self.memberships.contains_key(&conversation_id)
    }

    /// Join a conversation group. Joining twice is a no-op.
    ///
    /// No participant check is made here: any connection may join any
    /// conversation.
    pub fn join(&mut self, conversation_id: ConversationId) {
        if self.is_member(conversation_id) {
            debug!(
                "[Gateway] Connection {} already in {}",
                self.id,
                group_name(conversation_id)
            );
            return;
        }

        let mut subscription = Subscription::new(self.gateway.bus.clone(), conversation_id);
        let outbox = self.outbox.clone();
        let connection_id = self.id;

        let forwarder = tokio::spawn(async move {
            let Some(rx) = subscription.rx.as_mut() else {
                return;
            };
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let event = ServerEvent::Message(Message::clone(&message));
                        if outbox.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "[Gateway] Connection {} fell behind in {}, skipped {} messages",
                            connection_id,
                            group_name(conversation_id),
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.memberships.insert(conversation_id, forwarder);
        debug!(
            "[Gateway] Connection {} joined {}",
            self.id,
            group_name(conversation_id)
        );
    }

    /// Leave a conversation group. Returns whether the connection was in it.
    pub fn leave(&mut self, conversation_id: ConversationId) -> bool {
        match self.memberships.remove(&conversation_id) {
            Some(forwarder) => {
                forwarder.abort();
                debug!(
                    "[Gateway] Connection {} left {}",
                    self.id,
                    group_name(conversation_id)
                );
                true
            }
            None => false,
        }
    }

    /// Store a message and broadcast it to the conversation group
    pub async fn send(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        let message = self
            .gateway
            .messages
            .append(conversation_id, sender_id, content)
            .await?;
        self.gateway.publish(&message).await;
        Ok(message)
    }

    /// Apply one client event. Failures go back to this connection only.
    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::JoinConversation { conversation_id } => self.join(conversation_id),
            ClientEvent::LeaveConversation { conversation_id } => {
                self.leave(conversation_id);
            }
            ClientEvent::SendMessage {
                conversation_id,
                sender_id,
                content,
            } => {
                if let Err(e) = self.send(conversation_id, sender_id, &content).await {
                    warn!(
                        "[Gateway] Connection {} failed to send to {}: {}",
                        self.id,
                        group_name(conversation_id),
                        e
                    );
                    self.reject(e.public_message()).await;
                }
            }
        }
    }

    /// Report a failure to this connection
    pub async fn reject(&self, message: String) {
        let _ = self.outbox.send(ServerEvent::Error { message }).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, forwarder) in self.memberships.drain() {
            forwarder.abort();
        }
        let live = self
            .gateway
            .live_connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        info!("[Gateway] Connection {} closed ({} live)", self.id, live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{register, setup};
    use std::time::Duration;
    use tokio::time::timeout;

    const QUIET: Duration = Duration::from_millis(100);

    async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbox closed")
    }

    async fn assert_quiet(rx: &mut mpsc::Receiver<ServerEvent>) {
        assert!(timeout(QUIET, rx.recv()).await.is_err(), "unexpected event");
    }

    #[tokio::test]
    async fn test_two_joined_connections_each_get_one_message() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut first, mut first_rx) = state.gateway.connect();
        let (mut second, mut second_rx) = state.gateway.connect();
        first.join(conversation.id);
        second.join(conversation.id);
        assert_eq!(state.gateway.members(conversation.id), 2);

        let sent = first.send(conversation.id, alice.id, "hello").await.unwrap();

        for rx in [&mut first_rx, &mut second_rx] {
            match next_event(rx).await {
                ServerEvent::Message(message) => {
                    assert_eq!(message, sent);
                    assert_eq!(message.content, "hello");
                }
                other => panic!("expected message, got {:?}", other),
            }
            assert_quiet(rx).await;
        }
    }

    #[tokio::test]
    async fn test_double_join_delivers_once() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut session, mut rx) = state.gateway.connect();
        session.join(conversation.id);
        session.join(conversation.id);
        assert_eq!(state.gateway.members(conversation.id), 1);

        session.send(conversation.id, bob.id, "once").await.unwrap();

        assert!(matches!(next_event(&mut rx).await, ServerEvent::Message(_)));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn test_left_or_unjoined_connections_are_skipped_but_message_persists() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut sender, mut sender_rx) = state.gateway.connect();
        let (mut leaver, mut leaver_rx) = state.gateway.connect();
        let (_bystander, mut bystander_rx) = state.gateway.connect();

        sender.join(conversation.id);
        leaver.join(conversation.id);
        assert!(leaver.leave(conversation.id));
        assert!(!leaver.leave(conversation.id));

        sender.send(conversation.id, alice.id, "still stored").await.unwrap();

        assert!(matches!(next_event(&mut sender_rx).await, ServerEvent::Message(_)));
        assert_quiet(&mut leaver_rx).await;
        assert_quiet(&mut bystander_rx).await;

        let history = state.messages.list_by_conversation(conversation.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "still stored");
    }

    #[tokio::test]
    async fn test_failed_send_is_reported_to_sender_only() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut sender, mut sender_rx) = state.gateway.connect();
        let (mut other, mut other_rx) = state.gateway.connect();
        other.join(conversation.id);

        sender
            .handle(ClientEvent::SendMessage {
                conversation_id: 404,
                sender_id: alice.id,
                content: "nowhere".into(),
            })
            .await;

        match next_event(&mut sender_rx).await {
            ServerEvent::Error { message } => assert!(message.contains("404")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_quiet(&mut other_rx).await;
    }

    #[tokio::test]
    async fn test_handle_dispatches_join_send_leave() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut session, mut rx) = state.gateway.connect();
        session
            .handle(ClientEvent::JoinConversation {
                conversation_id: conversation.id,
            })
            .await;
        assert!(session.is_member(conversation.id));

        session
            .handle(ClientEvent::SendMessage {
                conversation_id: conversation.id,
                sender_id: bob.id,
                content: "via event".into(),
            })
            .await;
        match next_event(&mut rx).await {
            ServerEvent::Message(message) => {
                assert_eq!(message.sender.id, bob.id);
                assert_eq!(message.content, "via event");
            }
            other => panic!("expected message, got {:?}", other),
        }

        session
            .handle(ClientEvent::LeaveConversation {
                conversation_id: conversation.id,
            })
            .await;
        assert!(!session.is_member(conversation.id));
    }

    #[tokio::test]
    async fn test_disconnect_drops_memberships() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut session, _rx) = state.gateway.connect();
        session.join(conversation.id);
        assert_eq!(state.gateway.live_connections(), 1);

        drop(session);
        assert_eq!(state.gateway.live_connections(), 0);

        // Aborted forwarders release their subscriptions once the runtime
        // gets to them.
        timeout(Duration::from_secs(2), async {
            while state.gateway.members(conversation.id) > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("membership was not released");
    }

    async fn wait_for_no_groups(gateway: &Gateway) {
        timeout(Duration::from_secs(2), async {
            while gateway.open_groups() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("group was not closed");
    }

    #[tokio::test]
    async fn test_abandoned_groups_are_closed() {
        let (_dir, state) = setup().await;
        let alice = register(&state, "alice").await;
        let bob = register(&state, "bob").await;
        let conversation = state.conversations.find_or_create(alice.id, bob.id).await.unwrap();

        let (mut leaver, _leaver_rx) = state.gateway.connect();
        leaver.join(conversation.id);
        assert_eq!(state.gateway.open_groups(), 1);
        leaver.leave(conversation.id);
        wait_for_no_groups(&state.gateway).await;

        let (mut dropped, _dropped_rx) = state.gateway.connect();
        dropped.join(conversation.id);
        assert_eq!(state.gateway.open_groups(), 1);
        drop(dropped);
        wait_for_no_groups(&state.gateway).await;
    }
}
