use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::limits::CHANGE_CHANNEL_CAPACITY;
use crate::model::ChangeEvent;

/// What a subscriber listens to on the `businesses` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    AllListings,
    Listing(String),
}

/// Broadcast hub for listing change events, one channel per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<ChangeEvent>>,
    closed: AtomicBool,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to a topic. Creates the channel if needed. After
    /// [`close_all`](Self::close_all) the subscription is born closed.
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> Subscription {
        let rx = if self.closed.load(Ordering::Acquire) {
            broadcast::channel(1).1
        } else {
            self.channels
                .entry(topic.clone())
                .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0)
                .subscribe()
        };
        metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).increment(1.0);
        Subscription {
            topic,
            rx: Some(rx),
            hub: self.clone(),
        }
    }

    /// Fan an event out to the table topic and its row topic. No-op if nobody
    /// is listening.
    pub fn publish(&self, event: &ChangeEvent) {
        if let Some(sender) = self.channels.get(&Topic::AllListings) {
            let _ = sender.send(event.clone());
        }
        let row = Topic::Listing(event.listing_id().to_string());
        if let Some(sender) = self.channels.get(&row) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn has_topic(&self, topic: &Topic) -> bool {
        self.channels.contains_key(topic)
    }

    /// The feed is gone for good. Receivers drain what is buffered, then see
    /// [`SubscriptionError::Closed`].
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop the channel once its last receiver is gone.
    fn release(&self, topic: &Topic) {
        self.channels
            .remove_if(topic, |_, sender| sender.receiver_count() == 0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The subscriber fell behind and `0` events were discarded.
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),
    #[error("subscription closed")]
    Closed,
}

/// Owned handle to one change channel. Released exactly once: either by
/// [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    topic: Topic,
    rx: Option<broadcast::Receiver<ChangeEvent>>,
    hub: Arc<NotifyHub>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn is_released(&self) -> bool {
        self.rx.is_none()
    }

    pub async fn recv(&mut self) -> Result<ChangeEvent, SubscriptionError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(SubscriptionError::Closed);
        };
        match rx.recv().await {
            Ok(event) => Ok(event),
            Err(RecvError::Lagged(n)) => Err(SubscriptionError::Lagged(n)),
            Err(RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.hub.release(&self.topic);
            metrics::gauge!(crate::observability::SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            tracing::debug!("released subscription {:?}", self.topic);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BusinessListing;

    fn listing(id: &str) -> BusinessListing {
        BusinessListing {
            id: id.into(),
            name: format!("Listing {id}"),
            image: String::new(),
            category: vec!["Retail".into()],
            rating: 4.0,
            price_range: "1만원대".into(),
            description: String::new(),
            location: "Downtown".into(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = Arc::new(NotifyHub::new());
        let mut sub = hub.subscribe(Topic::AllListings);

        let event = ChangeEvent::Insert { row: listing("a") };
        hub.publish(&event);

        let received = sub.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn row_topic_only_sees_its_row() {
        let hub = Arc::new(NotifyHub::new());
        let mut sub = hub.subscribe(Topic::Listing("a".into()));

        hub.publish(&ChangeEvent::Update { row: listing("b") });
        hub.publish(&ChangeEvent::Delete { id: "a".into() });

        let received = sub.recv().await.unwrap();
        assert_eq!(received, ChangeEvent::Delete { id: "a".into() });
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(&ChangeEvent::Delete { id: "x".into() });
        assert!(!hub.has_topic(&Topic::AllListings));
    }

    #[test]
    fn last_unsubscribe_drops_topic() {
        let hub = Arc::new(NotifyHub::new());
        let a = hub.subscribe(Topic::AllListings);
        let b = hub.subscribe(Topic::AllListings);

        a.unsubscribe();
        assert!(hub.has_topic(&Topic::AllListings));
        drop(b);
        assert!(!hub.has_topic(&Topic::AllListings));
    }

    #[test]
    fn recv_waits_for_publish() {
        let hub = Arc::new(NotifyHub::new());
        let mut sub = hub.subscribe(Topic::AllListings);
        let mut recv = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(recv.poll());

        hub.publish(&ChangeEvent::Delete { id: "a".into() });
        assert!(recv.is_woken());
        let event = tokio_test::assert_ready!(recv.poll());
        assert_eq!(event, Ok(ChangeEvent::Delete { id: "a".into() }));
    }

    #[tokio::test]
    async fn close_all_ends_every_subscription() {
        let hub = Arc::new(NotifyHub::new());
        let mut all = hub.subscribe(Topic::AllListings);
        let mut row = hub.subscribe(Topic::Listing("a".into()));
        hub.publish(&ChangeEvent::Delete { id: "a".into() });

        hub.close_all();
        assert!(hub.is_closed());
        assert!(!hub.has_topic(&Topic::AllListings));

        // buffered events drain first
        assert_eq!(all.recv().await, Ok(ChangeEvent::Delete { id: "a".into() }));
        assert_eq!(all.recv().await, Err(SubscriptionError::Closed));
        assert_eq!(row.recv().await, Ok(ChangeEvent::Delete { id: "a".into() }));
        assert_eq!(row.recv().await, Err(SubscriptionError::Closed));

        let mut late = hub.subscribe(Topic::AllListings);
        assert_eq!(late.recv().await, Err(SubscriptionError::Closed));
        assert!(!hub.has_topic(&Topic::AllListings));
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told() {
        let hub = Arc::new(NotifyHub::new());
        let mut sub = hub.subscribe(Topic::AllListings);
        for i in 0..(CHANGE_CHANNEL_CAPACITY + 3) {
            hub.publish(&ChangeEvent::Delete { id: i.to_string() });
        }
        assert_eq!(sub.recv().await, Err(SubscriptionError::Lagged(3)));
        // Still usable afterwards
        assert!(sub.recv().await.is_ok());
    }
}
