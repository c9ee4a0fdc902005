//! Per-job notification bus.
//!
//! Each live job owns one broadcast channel. Publishing with no subscribers is
//! not an error; slow subscribers lag and skip rather than block the engine.

use tokio::sync::broadcast;

use crate::job::JobUpdate;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct JobBus {
    tx: broadcast::Sender<JobUpdate>,
}

impl Default for JobBus {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, update: JobUpdate) {
        let _ = self.tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_to_every_subscriber() {
        let bus = JobBus::new();
        bus.publish(JobUpdate::log("nobody listening"));

        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(JobUpdate::log("one"));
        bus.publish(JobUpdate::log("two"));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().log.as_deref(), Some("one"));
            assert_eq!(rx.recv().await.unwrap().log.as_deref(), Some("two"));
        }
    }

    #[tokio::test]
    async fn dropping_a_subscriber_does_not_affect_others() {
        let bus = JobBus::new();
        let a = bus.subscribe();
        let mut b = bus.subscribe();
        drop(a);
        bus.publish(JobUpdate::log("still here"));
        assert_eq!(b.recv().await.unwrap().log.as_deref(), Some("still here"));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
