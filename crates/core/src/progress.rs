//! Progress reporting for long-running git operations.
//!
//! A [`ProgressSink`] forwards `(task, percentage)` events to at most one
//! subscriber. Subscribing again replaces the previous subscriber, whose
//! stream then ends. Publishing never blocks and never fails: when the
//! subscriber has gone away it is dropped and events are discarded.
//!
//! Orchestration calls wrap the sink in a [`ProgressTracker`], which keeps
//! every task label non-decreasing within the call and closes the call with a
//! final `complete = 100` event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Label of the event that closes every orchestration call.
pub const COMPLETE_TASK: &str = "complete";

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task: String,
    pub percentage: u8,
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Single-subscriber event channel.
#[derive(Debug, Default)]
pub struct ProgressSink {
    subscriber: Mutex<Option<mpsc::UnboundedSender<ProgressEvent>>>,
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that already has its own subscriber, for callers that
    /// want the events of one call only.
    pub fn channel() -> (Arc<Self>, ProgressStream) {
        let sink = Arc::new(Self::new());
        let stream = sink.subscribe();
        (sink, stream)
    }

    /// Start receiving events, replacing any current subscriber.
    pub fn subscribe(&self) -> ProgressStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            debug!("progress subscriber replaced");
        }
        ProgressStream { rx }
    }

    /// Drop the current subscriber, if any.
    pub fn unsubscribe(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver an event to the current subscriber.
    pub fn publish(&self, task: impl Into<String>, percentage: u8) {
        let mut slot = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = slot.as_ref() else {
            return;
        };
        let event = ProgressEvent {
            task: task.into(),
            percentage: percentage.min(100),
        };
        if tx.send(event).is_err() {
            debug!("progress subscriber disconnected, dropping it");
            *slot = None;
        }
    }
}

/// Receiving half handed to a subscriber.
#[derive(Debug)]
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Wait for the next event. Returns `None` once the subscription has been
    /// replaced or the sink dropped.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Take every already-delivered event.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

// ---------------------------------------------------------------------------
// Per-call tracker
// ---------------------------------------------------------------------------

/// Per-call view of a sink that keeps each task label monotonic.
#[derive(Debug)]
pub struct ProgressTracker {
    sink: Arc<ProgressSink>,
    last: Mutex<HashMap<String, u8>>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<ProgressSink>) -> Self {
        Self {
            sink,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Publish `percentage` for `task` unless it would not move that task
    /// forward.
    pub fn report(&self, task: &str, percentage: u8) {
        let percentage = percentage.min(100);
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            match last.get(task) {
                Some(&previous) if percentage <= previous => return,
                _ => {
                    last.insert(task.to_string(), percentage);
                }
            }
        }
        self.sink.publish(task, percentage);
    }

    pub fn start(&self, task: &str) {
        self.report(task, 0);
    }

    pub fn finish(&self, task: &str) {
        self.report(task, 100);
    }

    /// Report a work-unit counter from the git engine.
    pub fn transfer(&self, task: &str, done: usize, total: usize) {
        self.report(task, percent(done, total));
    }

    /// Close the call.
    pub fn complete(&self) {
        self.finish(COMPLETE_TASK);
    }
}

/// Integer percentage of `done` out of `total`; an empty total counts as done.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done.min(total) as u128 * 100) / total as u128;
    pct as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscriber_is_noop() {
        let sink = ProgressSink::new();
        sink.publish("fetch", 10);
        assert!(!sink.has_subscriber());
    }

    #[test]
    fn test_subscriber_receives_events() {
        let (sink, mut stream) = ProgressSink::channel();
        sink.publish("fetch", 40);
        sink.publish("fetch", 250);
        assert_eq!(
            stream.drain(),
            vec![
                ProgressEvent {
                    task: "fetch".into(),
                    percentage: 40
                },
                ProgressEvent {
                    task: "fetch".into(),
                    percentage: 100
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_new_subscription_replaces_previous() {
        let sink = ProgressSink::new();
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.publish("clone", 5);

        assert_eq!(first.next().await, None);
        assert_eq!(second.try_next().map(|e| e.percentage), Some(5));
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped() {
        let sink = ProgressSink::new();
        let stream = sink.subscribe();
        drop(stream);

        sink.publish("push", 50);
        assert!(!sink.has_subscriber());
    }

    #[test]
    fn test_unsubscribe() {
        let sink = ProgressSink::new();
        let mut stream = sink.subscribe();
        sink.unsubscribe();
        sink.publish("merge", 0);
        assert!(stream.try_next().is_none());
        assert!(!sink.has_subscriber());
    }

    #[test]
    fn test_tracker_keeps_labels_monotonic() {
        let (sink, mut stream) = ProgressSink::channel();
        let tracker = ProgressTracker::new(sink);

        tracker.report("fetch: receiving objects", 10);
        tracker.report("fetch: receiving objects", 10);
        tracker.report("fetch: receiving objects", 5);
        tracker.report("fetch: receiving objects", 60);
        tracker.start("merge");
        tracker.complete();

        let events: Vec<(String, u8)> = stream
            .drain()
            .into_iter()
            .map(|e| (e.task, e.percentage))
            .collect();
        assert_eq!(
            events,
            vec![
                ("fetch: receiving objects".to_string(), 10),
                ("fetch: receiving objects".to_string(), 60),
                ("merge".to_string(), 0),
                (COMPLETE_TASK.to_string(), 100),
            ]
        );
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(0, 8), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(9, 3), 100);
    }
}
