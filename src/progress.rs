//! Progress event bus between the process layer and front-ends.
//!
//! `ProgressChannel` is an explicit object handed to the orchestration layer
//! at construction. Front-ends subscribe when they mount and unsubscribe when
//! they tear down. Each subscriber gets its own unbounded queue, so events are
//! never dropped and arrive in publish order; nothing is deduplicated.
//!
//! There is no "done" event. A job's completion is signaled only by its
//! resolved outcome, and the listener clears its `ProgressBoard` entry then.

use crate::errors::ProgressViolation;
use omniqc_common::{ProgressEvent, SampleId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::trace;

/// Handle identifying one subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    /// `None` receives every job
    filter: Option<SampleId>,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

/// One-way push channel for `ProgressEvent`s, cheap to clone.
#[derive(Clone, Default)]
pub struct ProgressChannel {
    registry: Arc<Mutex<Registry>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to progress for every job.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe to progress for one sample only.
    pub fn subscribe_to(&self, sample_id: SampleId) -> Subscription {
        self.register(Some(sample_id))
    }

    fn register(&self, filter: Option<SampleId>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.subscribers.insert(id, Subscriber { filter, tx });
        Subscription { id, rx }
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    /// Push an event to every matching subscriber.
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub fn publish(&self, event: ProgressEvent) {
        let mut registry = self.lock();
        registry.subscribers.retain(|_, sub| {
            if sub.filter.is_some_and(|id| id != event.sample_id) {
                return true;
            }
            sub.tx.send(event).is_ok()
        });
        trace!(
            sample_id = event.sample_id,
            percent = event.percent,
            "progress published"
        );
    }

    /// A publisher that tags every percent with `sample_id`.
    pub fn publisher(&self, sample_id: SampleId) -> JobProgress {
        JobProgress {
            channel: self.clone(),
            sample_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// Receiving end of a subscription.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, in order.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Publisher bound to one job.
#[derive(Clone)]
pub struct JobProgress {
    channel: ProgressChannel,
    sample_id: SampleId,
}

impl JobProgress {
    pub fn emit(&self, percent: u8) {
        self.channel
            .publish(ProgressEvent::new(self.sample_id, percent));
    }
}

/// Listener-side view of in-flight jobs: latest percent per sample.
#[derive(Debug, Default, Clone)]
pub struct ProgressBoard {
    entries: HashMap<SampleId, u8>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job as started at 0%.
    pub fn start(&mut self, sample_id: SampleId) {
        self.entries.insert(sample_id, 0);
    }

    /// Record an event.
    ///
    /// Returns `Ok(true)` when the percent advanced, `Ok(false)` for a
    /// repeated value, and an error when it went backwards. A rejected
    /// event leaves the entry unchanged.
    pub fn apply(&mut self, event: ProgressEvent) -> Result<bool, ProgressViolation> {
        match self.entries.get(&event.sample_id).copied() {
            Some(previous) if event.percent < previous => Err(ProgressViolation {
                sample_id: event.sample_id,
                previous,
                received: event.percent,
            }),
            Some(previous) if event.percent == previous => Ok(false),
            _ => {
                self.entries.insert(event.sample_id, event.percent);
                Ok(true)
            }
        }
    }

    /// Forget a job once its outcome has resolved.
    pub fn clear(&mut self, sample_id: SampleId) -> Option<u8> {
        self.entries.remove(&sample_id)
    }

    pub fn get(&self, sample_id: SampleId) -> Option<u8> {
        self.entries.get(&sample_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
