//! Component D: per-run in-memory pub/sub. No durability, no replay; all
//! delivery is in-process (§4.4). Grounded in this codebase's media-channel
//! `watching_client_ids: HashSet<usize>` registry — here, a `DashMap` keyed
//! by run id holding each run's live subscriber set.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use runforge_types::StreamFrame;
use tokio::sync::mpsc;

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<StreamFrame>,
}

pub struct Subscription {
    pub run_id: String,
    id: u64,
    pub rx: mpsc::Receiver<StreamFrame>,
}

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, run_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.topics
            .entry(run_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        Subscription {
            run_id: run_id.to_string(),
            id,
            rx,
        }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        if let Some(mut subs) = self.topics.get_mut(&subscription.run_id) {
            subs.retain(|s| s.id != subscription.id);
        }
    }

    /// Delivers `event` to every live subscriber of `run_id`. A subscriber
    /// whose queue is full is dropped; other subscribers are unaffected
    /// (§4.4) — the publisher never blocks on a slow reader.
    pub fn publish(&self, run_id: &str, event: StreamFrame) {
        if let Some(mut subs) = self.topics.get_mut(run_id) {
            subs.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => false,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.topics.get(run_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_all_live_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("rp-aaaaaaaaaa");
        let mut b = bus.subscribe("rp-aaaaaaaaaa");

        bus.publish("rp-aaaaaaaaaa", StreamFrame::Complete { run_id: "rp-aaaaaaaaaa".into() });

        assert!(a.rx.recv().await.is_some());
        assert!(b.rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_subscriber_is_dropped_others_unaffected() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe("rp-bbbbbbbbbb");
        let mut healthy = bus.subscribe("rp-bbbbbbbbbb");

        for _ in 0..SUBSCRIBER_QUEUE_CAPACITY + 1 {
            bus.publish(
                "rp-bbbbbbbbbb",
                StreamFrame::Complete { run_id: "rp-bbbbbbbbbb".into() },
            );
        }

        assert_eq!(bus.subscriber_count("rp-bbbbbbbbbb"), 1);
        assert!(healthy.rx.recv().await.is_some());
        // The dropped subscriber's channel is closed from the sender side.
        while slow.rx.recv().await.is_some() {}
    }
}
