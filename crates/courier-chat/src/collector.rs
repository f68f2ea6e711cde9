use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::IncomingMessage;

pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(1);

struct PendingGroup {
    items: Vec<IncomingMessage>,
    generation: u64,
}

/// Buffers album items sharing a media-group id and releases the whole group
/// once no new item has arrived for the timeout window. Non-album messages
/// pass straight through.
pub struct MediaGroupCollector {
    timeout: Duration,
    pending: Arc<Mutex<HashMap<String, PendingGroup>>>,
    ready_tx: mpsc::UnboundedSender<Vec<IncomingMessage>>,
}

impl MediaGroupCollector {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Vec<IncomingMessage>>) {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        (
            Self {
                timeout,
                pending: Arc::new(Mutex::new(HashMap::new())),
                ready_tx,
            },
            ready_rx,
        )
    }

    /// Returns the full "group" immediately for non-album messages; album
    /// items buffer and the completed group arrives on the ready channel.
    pub fn add(&self, message: IncomingMessage) -> Option<Vec<IncomingMessage>> {
        let Some(group_id) = message.media_group_id.clone() else {
            return Some(vec![message]);
        };

        let generation = {
            let mut pending = self.pending.lock().expect("pending lock");
            let group = pending.entry(group_id.clone()).or_insert(PendingGroup {
                items: Vec::new(),
                generation: 0,
            });
            group.items.push(message);
            group.generation += 1;
            group.generation
        };

        // Sliding window: each new item schedules a fresh deadline and stale
        // deadlines notice the generation moved on.
        let pending = Arc::clone(&self.pending);
        let ready_tx = self.ready_tx.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let group = {
                let mut pending = pending.lock().expect("pending lock");
                match pending.get(&group_id) {
                    Some(group) if group.generation == generation => {
                        pending.remove(&group_id).map(|group| group.items)
                    }
                    _ => None,
                }
            };
            if let Some(items) = group {
                let _ = ready_tx.send(items);
            }
        });

        None
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, timeout as tokio_timeout};

    use super::*;

    fn album_item(group: &str, message_id: i64) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_id,
            user_id: 42,
            media_group_id: Some(group.to_owned()),
            ..IncomingMessage::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_album_messages_pass_straight_through() {
        let (collector, _ready) = MediaGroupCollector::new(DEFAULT_GROUP_TIMEOUT);

        let message = IncomingMessage {
            chat_id: 1,
            message_id: 5,
            user_id: 42,
            text: Some("hello".to_owned()),
            ..IncomingMessage::default()
        };
        let group = collector.add(message.clone()).expect("immediate release");
        assert_eq!(group, vec![message]);
    }

    #[tokio::test(start_paused = true)]
    async fn album_items_are_released_together_after_the_window() {
        let (collector, mut ready) = MediaGroupCollector::new(DEFAULT_GROUP_TIMEOUT);

        assert!(collector.add(album_item("g1", 1)).is_none());
        assert!(collector.add(album_item("g1", 2)).is_none());
        assert!(collector.add(album_item("g1", 3)).is_none());

        advance(Duration::from_millis(1100)).await;
        let group = tokio_timeout(Duration::from_secs(1), ready.recv())
            .await
            .expect("group timeout")
            .expect("group arrives");
        let ids: Vec<i64> = group.iter().map(|message| message.message_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_while_items_keep_arriving() {
        let (collector, mut ready) = MediaGroupCollector::new(DEFAULT_GROUP_TIMEOUT);

        assert!(collector.add(album_item("g1", 1)).is_none());
        advance(Duration::from_millis(600)).await;
        assert!(collector.add(album_item("g1", 2)).is_none());

        // The first deadline passes without firing; the group is still open.
        advance(Duration::from_millis(600)).await;
        assert!(ready.try_recv().is_err());

        advance(Duration::from_millis(500)).await;
        let group = tokio_timeout(Duration::from_secs(1), ready.recv())
            .await
            .expect("group timeout")
            .expect("group arrives");
        assert_eq!(group.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_groups_do_not_interfere() {
        let (collector, mut ready) = MediaGroupCollector::new(DEFAULT_GROUP_TIMEOUT);

        assert!(collector.add(album_item("g1", 1)).is_none());
        assert!(collector.add(album_item("g2", 9)).is_none());

        advance(Duration::from_millis(1100)).await;
        let first = ready.recv().await.expect("first group");
        let second = ready.recv().await.expect("second group");
        let mut sizes = [first.len(), second.len()];
        sizes.sort_unstable();
        assert_eq!(sizes, [1, 1]);
        assert_ne!(first[0].media_group_id, second[0].media_group_id);
    }
}
