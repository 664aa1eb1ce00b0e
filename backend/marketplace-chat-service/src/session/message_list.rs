use crate::models::Message;
use uuid::Uuid;

/// Locally held messages in display order, unique by id.
#[derive(Debug, Default, Clone)]
pub struct MessageList {
    items: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at its sorted position. `false` if the id is already present.
    pub fn merge(&mut self, message: Message) -> bool {
        if self.items.iter().any(|m| m.id == message.id) {
            return false;
        }
        let pos = self
            .items
            .partition_point(|m| m.display_cmp(&message).is_lt());
        self.items.insert(pos, message);
        true
    }

    /// Merge a batch (e.g. history); returns how many were new.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.merge(message) {
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Message> {
        let pos = self.items.iter().position(|m| m.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.items.last()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.items.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn msg(seq: i64, offset_ms: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            content: format!("m{seq}"),
            sequence_number: seq,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
        }
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let mut list = MessageList::new();
        let m = msg(1, 0);
        assert!(list.merge(m.clone()));
        assert!(!list.merge(m));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut list = MessageList::new();
        let (a, b, c) = (msg(1, 0), msg(2, 10), msg(3, 20));
        list.merge(c.clone());
        list.merge(a.clone());
        assert_eq!(list.merge_all(vec![b.clone(), a.clone()]), 1);

        let ids: Vec<Uuid> = list.as_slice().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(list.last().map(|m| m.id), Some(c.id));
    }

    #[test]
    fn remove_by_id() {
        let mut list = MessageList::new();
        let m = msg(1, 0);
        list.merge(m.clone());
        assert_eq!(list.remove(m.id).map(|r| r.id), Some(m.id));
        assert!(list.remove(m.id).is_none());
        assert!(list.is_empty());
    }
}
