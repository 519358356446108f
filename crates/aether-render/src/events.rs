//! Window resize notifications, delivered at frame boundaries.

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::resource::Extent2d;

/// Publishes window events to any number of subscribers.
#[derive(Default)]
pub struct WindowEvents {
    subscribers: Vec<Sender<Extent2d>>,
}

impl WindowEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// New subscription; dropping it unsubscribes.
    pub fn subscribe(&mut self) -> ResizeSubscription {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        ResizeSubscription { rx }
    }

    /// Queue `size` for every live subscriber.
    pub fn notify_resize(&mut self, size: Extent2d) {
        self.subscribers.retain(|tx| tx.send(size).is_ok());
    }

    /// Subscribers still alive as of the last notification.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving end of [`WindowEvents::subscribe`].
pub struct ResizeSubscription {
    rx: Receiver<Extent2d>,
}

impl ResizeSubscription {
    /// Drain pending notifications; the most recent size wins.
    pub fn latest(&self) -> Option<Extent2d> {
        self.rx.try_iter().last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_size_wins() {
        let mut events = WindowEvents::new();
        let sub = events.subscribe();
        assert_eq!(sub.latest(), None);
        events.notify_resize(Extent2d::new(10, 10));
        events.notify_resize(Extent2d::new(20, 5));
        assert_eq!(sub.latest(), Some(Extent2d::new(20, 5)));
        assert_eq!(sub.latest(), None);
    }

    #[test]
    fn test_dropped_subscription_is_removed() {
        let mut events = WindowEvents::new();
        let kept = events.subscribe();
        drop(events.subscribe());
        events.notify_resize(Extent2d::new(1, 1));
        assert_eq!(events.subscriber_count(), 1);
        assert_eq!(kept.latest(), Some(Extent2d::new(1, 1)));
    }
}
