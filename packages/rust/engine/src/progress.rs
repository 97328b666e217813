//! Per-job fan-out of progress events to live subscribers.
//!
//! Delivery is at-most-once and never blocks the publisher: every subscriber
//! owns a bounded channel, and an event that does not fit is dropped for that
//! subscriber only. Late subscribers get no replay.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use briefwise_shared::{JobId, ProgressEvent};

/// Identifies one subscription within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<ProgressEvent>,
}

struct Inner {
    channels: DashMap<JobId, Vec<Subscriber>>,
    buffer: usize,
    next_id: AtomicU64,
}

/// Cheap-to-clone handle over the shared subscriber registry.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<Inner>,
}

impl ProgressBroadcaster {
    /// `buffer` is the per-subscriber channel capacity (at least 1).
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a new observer for `job_id`. Dropping the returned
    /// [`Subscription`] unsubscribes it.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .channels
            .entry(job_id.clone())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(%job_id, subscriber = id.0, "progress subscriber added");

        Subscription {
            id,
            job_id: job_id.clone(),
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Remove one subscriber. The job's entry goes away with its last one.
    pub fn unsubscribe(&self, job_id: &JobId, id: SubscriberId) {
        self.remove_subscribers(job_id, &[id]);
        debug!(%job_id, subscriber = id.0, "progress subscriber removed");
    }

    /// Deliver `event` to every current subscriber of `job_id` without waiting.
    pub fn publish(&self, job_id: &JobId, event: ProgressEvent) {
        let mut closed = Vec::new();
        {
            let Some(subscribers) = self.inner.channels.get(job_id) else {
                trace!(%job_id, agent = %event.agent, "no subscribers, event dropped");
                return;
            };
            for subscriber in subscribers.iter() {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            %job_id,
                            subscriber = subscriber.id.0,
                            agent = %event.agent,
                            "subscriber channel full, event dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        if !closed.is_empty() {
            debug!(%job_id, pruned = closed.len(), "pruning closed subscribers");
            self.remove_subscribers(job_id, &closed);
        }
    }

    /// Drop every channel of `job_id`. Open streams end once their buffered
    /// events are drained, even if the terminal event did not fit.
    pub fn close(&self, job_id: &JobId) {
        if let Some((_, subscribers)) = self.inner.channels.remove(job_id) {
            debug!(%job_id, subscribers = subscribers.len(), "progress channels closed");
        }
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.inner
            .channels
            .get(job_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of jobs with at least one subscriber.
    pub fn active_jobs(&self) -> usize {
        self.inner.channels.len()
    }

    fn remove_subscribers(&self, job_id: &JobId, ids: &[SubscriberId]) {
        if let Some(mut subscribers) = self.inner.channels.get_mut(job_id) {
            subscribers.retain(|s| !ids.contains(&s.id));
        }
        self.inner
            .channels
            .remove_if(job_id, |_, subscribers| subscribers.is_empty());
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("active_jobs", &self.active_jobs())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Item yielded by a progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressItem {
    Event(ProgressEvent),
    /// Nothing arrived within the keepalive interval.
    Keepalive,
}

/// One observer's receiving end. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    job_id: JobId,
    rx: mpsc::Receiver<ProgressEvent>,
    broadcaster: ProgressBroadcaster,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Turn the subscription into a stream that emits a keepalive after each
    /// `keepalive` interval of silence and ends right after a terminal event.
    pub fn into_stream(self, keepalive: Duration) -> impl Stream<Item = ProgressItem> + Send {
        futures::stream::unfold((self, false), move |(mut sub, finished)| async move {
            if finished {
                return None;
            }
            match tokio::time::timeout(keepalive, sub.rx.recv()).await {
                Ok(Some(event)) => {
                    let terminal = event.is_terminal();
                    Some((ProgressItem::Event(event), (sub, terminal)))
                }
                Ok(None) => None,
                Err(_) => Some((ProgressItem::Keepalive, (sub, false))),
            }
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.job_id, self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .finish()
    }
}
