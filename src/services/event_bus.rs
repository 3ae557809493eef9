//! Ordered, resumable event bus for import progress.
//!
//! Fan-out uses tokio::sync::broadcast. A bounded retention buffer keeps the most
//! recent events so a reconnecting subscriber can resume from its last seen id.
//! Events older than the retention window are gone for good.
//!
//! A connected subscriber that stops reading keeps whatever the live channel or
//! the retention buffer still holds, whichever reaches further back. Only events
//! older than both are lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::Stream;
use tokio::sync::broadcast;

use crate::models::{EventDraft, ProgressEvent};

/// Minimum capacity of the live broadcast channel.
const MIN_CHANNEL_CAPACITY: usize = 64;

/// Monotonic id source. Ids start at 1.
#[derive(Debug, Default)]
pub struct EventCounter(AtomicU64);

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after `last` (e.g. ids handed out by a previous bus).
    pub fn starting_after(last: u64) -> Self {
        Self(AtomicU64::new(last))
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct Inner {
    counter: Arc<EventCounter>,
    retained: Mutex<VecDeque<ProgressEvent>>,
    retention: usize,
    sender: broadcast::Sender<ProgressEvent>,
}

impl Inner {
    fn retained(&self) -> MutexGuard<'_, VecDeque<ProgressEvent>> {
        self.retained.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retained_after(&self, last_seen: u64) -> VecDeque<ProgressEvent> {
        self.retained()
            .iter()
            .filter(|e| e.id > last_seen)
            .cloned()
            .collect()
    }
}

/// Multi-subscriber event bus with a total order over ids.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(retention: usize) -> Self {
        Self::with_counter(retention, Arc::new(EventCounter::new()))
    }

    pub fn with_counter(retention: usize, counter: Arc<EventCounter>) -> Self {
        let (sender, _) = broadcast::channel(retention.max(MIN_CHANNEL_CAPACITY));
        Self {
            inner: Arc::new(Inner {
                counter,
                retained: Mutex::new(VecDeque::with_capacity(retention)),
                retention,
                sender,
            }),
        }
    }

    /// Assign the next id and deliver the event to every subscriber.
    ///
    /// Id assignment, retention and fan-out happen under one lock, so ids are
    /// observed in publish order by every subscriber.
    pub fn publish(&self, draft: EventDraft) -> ProgressEvent {
        let mut retained = self.inner.retained();

        let event = ProgressEvent::from_draft(self.inner.counter.next(), draft);
        retained.push_back(event.clone());
        while retained.len() > self.inner.retention {
            retained.pop_front();
        }

        // No subscribers is not an error.
        let _ = self.inner.sender.send(event.clone());
        event
    }

    /// Subscribe to events published after `last_seen`.
    ///
    /// `None` yields only events published from now on.
    pub fn subscribe(&self, last_seen: Option<u64>) -> Subscription {
        let retained = self.inner.retained();
        let receiver = self.inner.sender.subscribe();
        let backlog = match last_seen {
            Some(id) => retained.iter().filter(|e| e.id > id).cloned().collect(),
            None => VecDeque::new(),
        };
        drop(retained);

        Subscription {
            inner: self.inner.clone(),
            backlog,
            receiver,
            last_id: last_seen.unwrap_or(0),
        }
    }

    /// Retained events with ids greater than `last_seen`.
    pub fn events_since(&self, last_seen: u64) -> Vec<ProgressEvent> {
        self.inner.retained_after(last_seen).into()
    }

    /// Id of the most recently published event still retained.
    pub fn last_id(&self) -> Option<u64> {
        self.inner.retained().back().map(|e| e.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

/// A subscriber's view of the bus: backlog first, then live events, never out of order.
pub struct Subscription {
    inner: Arc<Inner>,
    backlog: VecDeque<ProgressEvent>,
    receiver: broadcast::Receiver<ProgressEvent>,
    last_id: u64,
}

impl Subscription {
    /// Next event, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                if event.id > self.last_id {
                    self.last_id = event.id;
                    return Some(event);
                }
                continue;
            }

            match self.receiver.recv().await {
                Ok(event) if event.id > self.last_id => {
                    self.last_id = event.id;
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, last_id = self.last_id, "Subscriber lagged, recovering buffered events");
                    self.backlog = self.recover();
                    if let Some(first) = self.backlog.front()
                        && first.id > self.last_id + 1
                    {
                        tracing::warn!(
                            from = self.last_id + 1,
                            to = first.id - 1,
                            "Events fell out of the retention window"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Everything still buffered after `last_id`, from retention and the channel.
    fn recover(&mut self) -> VecDeque<ProgressEvent> {
        let mut events: Vec<ProgressEvent> = self.inner.retained_after(self.last_id).into();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        events.retain(|e| e.id > self.last_id);
        events.sort_by_key(|e| e.id);
        events.dedup_by_key(|e| e.id);
        events.into()
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}
