//! Per-job progress fan-out
//!
//! One producer (the coordinator) publishes events for a job id; any number of
//! subscribers receive them through bounded channels. Nothing is buffered for
//! subscribers that are not attached yet, and a terminal event closes every
//! subscription for the job and releases its registry entry.
//!
//! Publishing never waits. Each subscriber channel keeps its last slot for the
//! terminal event: a progress event that would fill it is dropped for that
//! subscriber instead.

use dashmap::DashMap;
use futures::stream::{self, Stream};
use revu_common::ProgressEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<ProgressEvent>,
}

pub struct ProgressBroadcaster {
    channels: DashMap<Uuid, Vec<Subscriber>>,
    buffer: usize,
    next_subscriber: AtomicU64,
}

impl ProgressBroadcaster {
    /// `buffer` is the per-subscriber capacity; values below 2 are raised to 2.
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            buffer: buffer.max(2),
            next_subscriber: AtomicU64::new(1),
        })
    }

    /// Register a job so that subscribers can attach to it
    pub fn open(&self, job_id: Uuid) {
        self.channels.entry(job_id).or_default();
        debug!(%job_id, "Opened progress channel");
    }

    pub fn is_open(&self, job_id: Uuid) -> bool {
        self.channels.contains_key(&job_id)
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.channels.get(&job_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver an event to the job's current subscribers
    pub fn emit(&self, job_id: Uuid, event: ProgressEvent) {
        if event.is_terminal() {
            let Some((_, subscribers)) = self.channels.remove(&job_id) else {
                return;
            };
            for subscriber in subscribers {
                if subscriber.sender.try_send(event.clone()).is_err() {
                    debug!(%job_id, subscriber = subscriber.id, "Subscriber gone before terminal event");
                }
            }
            debug!(%job_id, kind = event.kind.as_str(), "Closed progress channel");
            return;
        }

        let Some(mut subscribers) = self.channels.get_mut(&job_id) else {
            return;
        };
        subscribers.retain(|subscriber| {
            if subscriber.sender.is_closed() {
                return false;
            }
            if subscriber.sender.capacity() > 1 {
                // The only way this fails now is a receiver closing concurrently
                let _ = subscriber.sender.try_send(event.clone());
            } else {
                trace!(%job_id, subscriber = subscriber.id, "Dropping progress for slow subscriber");
            }
            true
        });
    }

    /// Attach to a job's events.
    ///
    /// For an unknown or finished job the subscription ends immediately.
    pub fn subscribe(self: &Arc<Self>, job_id: Uuid) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        match self.channels.get_mut(&job_id) {
            Some(mut subscribers) => {
                subscribers.push(Subscriber { id, sender });
                debug!(%job_id, subscriber = id, "Subscribed to progress");
            },
            None => {
                debug!(%job_id, "Subscribed to unknown or finished job");
                drop(sender);
            },
        }

        Subscription {
            job_id,
            id,
            receiver,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Detach a subscriber. Unknown ids are ignored.
    fn unsubscribe(&self, job_id: Uuid, subscriber_id: u64) {
        if let Some(mut subscribers) = self.channels.get_mut(&job_id) {
            subscribers.retain(|s| s.id != subscriber_id);
        }
    }
}

/// Receiving end of a job's events; detaches itself when dropped
pub struct Subscription {
    job_id: Uuid,
    id: u64,
    receiver: mpsc::Receiver<ProgressEvent>,
    broadcaster: Weak<ProgressBroadcaster>,
}

impl Subscription {
    /// Next event, or `None` once the job has finished or was never known
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.job_id, self.id);
        }
    }
}
