use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use super::transcript::{merge_fragment, MessageStatus, TranscriptMessage};
use crate::protocol::Role;

/// Published view of the history
///
/// Messages are shared with the aggregator, so a snapshot costs one pointer
/// per message and a fragment copies only the message it extends.
pub type TranscriptSnapshot = Arc<[Arc<TranscriptMessage>]>;

/// Read model over the conversation history
///
/// Messages are addressed by slot (their index); a slot is never split or
/// moved. Every mutation publishes a fresh snapshot to subscribers.
pub struct TranscriptAggregator {
    messages: Vec<Arc<TranscriptMessage>>,
    publisher: watch::Sender<TranscriptSnapshot>,
}

impl Default for TranscriptAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(TranscriptSnapshot::from(Vec::new()));
        Self {
            messages: Vec::new(),
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.publisher.subscribe()
    }

    pub fn messages(&self) -> &[Arc<TranscriptMessage>] {
        &self.messages
    }

    /// Closed messages only
    pub fn stable_messages(&self) -> impl Iterator<Item = &Arc<TranscriptMessage>> {
        self.messages.iter().filter(|m| !m.is_open())
    }

    pub fn get(&self, slot: usize) -> Option<&TranscriptMessage> {
        self.messages.get(slot).map(|message| &**message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Start a new open message; blank fragments open nothing
    pub fn open(&mut self, role: Role, fragment: &str, is_transcript: bool) -> Option<usize> {
        if fragment.trim().is_empty() {
            return None;
        }

        let mut content = String::new();
        merge_fragment(&mut content, fragment);
        Some(self.push(role, content, is_transcript, MessageStatus::Open))
    }

    /// Merge a fragment into an open message
    pub fn extend(&mut self, slot: usize, fragment: &str) {
        if fragment.trim().is_empty() {
            return;
        }

        if let Some(message) = self.messages.get_mut(slot) {
            if message.is_open() {
                merge_fragment(&mut Arc::make_mut(message).content, fragment);
                self.publish();
            }
        }
    }

    pub fn close(&mut self, slot: usize) {
        if let Some(message) = self.messages.get_mut(slot) {
            if message.is_open() {
                Arc::make_mut(message).status = MessageStatus::Closed;
                self.publish();
            }
        }
    }

    /// Append a message that is final on arrival (typed text)
    pub fn push_closed(&mut self, role: Role, content: &str, is_transcript: bool) -> usize {
        self.push(role, content.to_string(), is_transcript, MessageStatus::Closed)
    }

    fn push(
        &mut self,
        role: Role,
        content: String,
        is_transcript: bool,
        status: MessageStatus,
    ) -> usize {
        self.messages.push(Arc::new(TranscriptMessage {
            role,
            content,
            is_transcript,
            timestamp: Utc::now(),
            status,
        }));
        self.publish();
        self.messages.len() - 1
    }

    fn publish(&self) {
        self.publisher
            .send_replace(self.messages.iter().cloned().collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_only_touches_open_slots() {
        let mut aggregator = TranscriptAggregator::new();
        let slot = aggregator.open(Role::Agent, "Hello", false).unwrap();
        aggregator.extend(slot, "world");
        aggregator.close(slot);
        aggregator.extend(slot, "again");

        assert_eq!(aggregator.get(slot).unwrap().content, "Hello world");
        assert_eq!(aggregator.stable_messages().count(), 1);
    }

    #[test]
    fn blank_fragments_open_nothing() {
        let mut aggregator = TranscriptAggregator::new();
        assert!(aggregator.open(Role::User, "   ", true).is_none());
        assert!(aggregator.is_empty());
    }

    #[test]
    fn subscribers_see_every_change() {
        let mut aggregator = TranscriptAggregator::new();
        let rx = aggregator.subscribe();

        let slot = aggregator.open(Role::User, "find", true).unwrap();
        aggregator.extend(slot, "shoes");

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "find shoes");
        assert!(snapshot[0].is_open());
    }

    #[test]
    fn snapshots_share_untouched_messages() {
        let mut aggregator = TranscriptAggregator::new();
        let rx = aggregator.subscribe();

        let first = aggregator.open(Role::User, "hello", false).unwrap();
        aggregator.close(first);
        let second = aggregator.open(Role::Agent, "Hi", false).unwrap();
        let before = rx.borrow().clone();

        aggregator.extend(second, "there");
        let after = rx.borrow().clone();

        assert!(Arc::ptr_eq(&before[0], &after[0]), "Closed messages are not copied");
        assert_eq!(before[1].content, "Hi", "Published snapshots never change");
        assert_eq!(after[1].content, "Hi there");
    }
}
