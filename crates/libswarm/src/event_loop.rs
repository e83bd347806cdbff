use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{events::Event, scheduler::Scheduler};

// Capacity 1: producers rendezvous with the consumer, so a slow loop
// backpressures every background task instead of buffering events.
const EVENT_QUEUE_CAPACITY: usize = 1;

/// Producer half of the scheduler's serialized event queue. Cheap to clone;
/// every background task holds one.
#[derive(Clone)]
pub struct EventLoop {
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl EventLoop {
    pub(crate) fn new(cancel: CancellationToken) -> (Self, EventLoopRunner) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (
            Self {
                tx,
                cancel: cancel.clone(),
            },
            EventLoopRunner { rx, cancel },
        )
    }

    /// Delivers an event for later application. Blocks until the consumer
    /// accepts it; once the scheduler is stopped the event is silently
    /// dropped.
    ///
    /// Must never be called from the loop thread itself (i.e. while an
    /// event is being applied), else the rendezvous deadlocks. Background
    /// tasks send; event handlers spawn.
    pub async fn send(&self, event: Event) {
        tokio::select! {
            res = self.tx.send(event) => {
                if res.is_err() {
                    trace!("event dropped, consumer is gone");
                }
            }
            _ = self.cancel.cancelled() => {
                trace!("event dropped, scheduler stopped");
            }
        }
    }
}

/// Consumer half. Owns the scheduler for the lifetime of the loop, which
/// makes the single-writer rule structural.
pub(crate) struct EventLoopRunner {
    rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
}

impl EventLoopRunner {
    pub async fn run(mut self, mut scheduler: Scheduler) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = self.rx.recv() => match event {
                    Some(event) => scheduler.handle_event(event),
                    None => return,
                }
            }
        }
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<Event> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_send_unblocks_and_drops_on_stop() {
        let cancel = CancellationToken::new();
        let (events, mut runner) = EventLoop::new(cancel.clone());

        // Fill the rendezvous slot so the next send has to block.
        events.send(Event::AnnounceTick).await;

        let blocked = {
            let events = events.clone();
            tokio::spawn(async move { events.send(Event::PreemptionTick).await })
        };
        // Give the blocked send a chance to park.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        cancel.cancel();
        blocked.await.unwrap();

        // Only the first event made it in.
        assert!(matches!(runner.rx.try_recv(), Ok(Event::AnnounceTick)));
        assert!(runner.rx.try_recv().is_err());
    }
}
