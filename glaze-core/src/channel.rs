//! Thread-safe handoff between a job's worker thread and the cooperative
//! consumer of its event stream.
//!
//! This is the one piece of cross-thread synchronization in the core: the
//! worker (and the per-step hook running inside backend calls) enqueues from
//! a foreign thread, the consumer awaits dequeue on the runtime. The
//! underlying unbounded mpsc queue preserves per-producer order and never
//! drops, and every item a job produces comes from its single worker thread,
//! so the consumer observes events in exact production order.

use tokio::sync::mpsc;

use crate::{GenerationError, ProgressEvent};

enum Item {
    Event(ProgressEvent),
    /// End-of-stream marker; nothing follows it.
    Done,
}

/// Producer half, cloned into the worker and its progress hook.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<Item>,
}

/// Consumer half: a live, ordered sequence of events for one job.
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<Item>,
    finished: bool,
}

/// Creates the channel for one job.
pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSender { tx },
        ProgressStream {
            rx,
            finished: false,
        },
    )
}

impl ProgressSender {
    /// Enqueues one event. Non-blocking and safe from any thread. Fails only
    /// when the consumer dropped the stream, which aborts the job.
    pub fn emit(&self, event: ProgressEvent) -> Result<(), GenerationError> {
        self.tx
            .send(Item::Event(event))
            .map_err(|_| GenerationError::ChannelClosed)
    }

    /// Enqueues the end-of-stream marker. A send failure means the consumer
    /// is already gone and there is nobody left to notify.
    pub fn finish(&self) {
        let _ = self.tx.send(Item::Done);
    }
}

impl ProgressStream {
    /// Waits for the next event; the caller suspends, it never polls.
    /// Returns `None` once the end-of-stream marker has been received, and
    /// keeps returning `None` afterwards.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Item::Event(event)) => Some(event),
            // A closed queue without a marker can only happen if every
            // sender was dropped first, which the worker's finish guard
            // prevents; treat it as termination either way.
            Some(Item::Done) | None => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_production_order() {
        let (tx, mut rx) = progress_channel();
        for step in 1..=5 {
            tx.emit(ProgressEvent::Progress {
                step,
                total_steps: 5,
            })
            .unwrap();
        }
        tx.finish();

        for step in 1..=5 {
            assert_eq!(
                rx.next().await,
                Some(ProgressEvent::Progress {
                    step,
                    total_steps: 5
                })
            );
        }
        assert_eq!(rx.next().await, None);
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn emit_fails_once_consumer_is_gone() {
        let (tx, rx) = progress_channel();
        drop(rx);
        let err = tx.emit(ProgressEvent::Generating).unwrap_err();
        assert!(matches!(err, GenerationError::ChannelClosed));
        // finish() must not panic either.
        tx.finish();
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_the_marker() {
        let (tx, mut rx) = progress_channel();
        tx.emit(ProgressEvent::Generating).unwrap();
        tx.finish();
        // Late enqueue from a straggling producer clone.
        tx.emit(ProgressEvent::Refining).unwrap();

        assert_eq!(rx.next().await, Some(ProgressEvent::Generating));
        assert_eq!(rx.next().await, None);
        assert_eq!(rx.next().await, None);
    }
}
