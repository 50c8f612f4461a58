//! Change notifications for the reconciliation loops
//!
//! Notifications reach a project loop through the [`EventHub`]. Webhook
//! payloads ([`parse_webhook`]) and the periodic [`Watcher`] sweep both
//! publish into it. A notification for an MR that is still queued is merged
//! into the queued entry instead of being delivered twice.

mod watcher;
mod webhook;

pub use watcher::Watcher;
pub use webhook::{WebhookEvent, parse_webhook, route_webhook};

use crate::error::Result;
use crate::store::Store;
use crate::types::MergeRequestRecord;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// "MR changed" notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrEvent {
    /// MR iid
    pub iid: u64,
    /// The automation user was newly (re-)assigned
    pub reassigned: bool,
}

impl MrEvent {
    /// Plain change notification
    pub const fn changed(iid: u64) -> Self {
        Self {
            iid,
            reassigned: false,
        }
    }

    /// Notification for a fresh assignment
    pub const fn reassigned(iid: u64) -> Self {
        Self {
            iid,
            reassigned: true,
        }
    }
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<u64>,
    pending: HashMap<u64, bool>,
}

#[derive(Default)]
struct ProjectQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ProjectQueue {
    fn push(&self, event: MrEvent) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(reassigned) = state.pending.get_mut(&event.iid) {
                *reassigned |= event.reassigned;
                return;
            }
            state.pending.insert(event.iid, event.reassigned);
            state.order.push_back(event.iid);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<MrEvent> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let iid = state.order.pop_front()?;
        let reassigned = state.pending.remove(&iid).unwrap_or(false);
        Some(MrEvent { iid, reassigned })
    }

    fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }
}

/// In-process, per-project, de-duplicating notification queue
#[derive(Clone, Default)]
pub struct EventHub {
    queues: Arc<Mutex<HashMap<String, Arc<ProjectQueue>>>>,
}

impl EventHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, project: &str) -> Arc<ProjectQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(project.to_string()).or_default())
    }

    /// Queue a notification for `project`
    pub fn publish(&self, project: &str, event: MrEvent) {
        self.queue(project).push(event);
    }

    /// Notifications waiting for `project`
    pub fn pending(&self, project: &str) -> usize {
        self.queue(project).len()
    }

    /// Receiving end for `project`
    pub fn subscribe(&self, project: &str) -> Subscription {
        Subscription {
            queue: self.queue(project),
        }
    }
}

/// Receiving end of one project's queue
pub struct Subscription {
    queue: Arc<ProjectQueue>,
}

impl Subscription {
    /// Wait for the next notification.
    ///
    /// Cancel-safe: dropping the future never loses a notification.
    pub async fn recv(&self) -> MrEvent {
        loop {
            if let Some(event) = self.queue.pop() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Next notification, if one is queued
    pub fn try_recv(&self) -> Option<MrEvent> {
        self.queue.pop()
    }
}

/// What a reconciliation loop needs from its event source
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Deduplicated, at-least-once stream of changed MRs
    fn subscribe(&self, project: &str) -> Subscription;

    /// Current `ready` MRs for the periodic tick
    async fn poll_ready(&self, project: &str) -> Result<Vec<MergeRequestRecord>>;
}

/// Event source backed by the hub and the store
#[derive(Clone)]
pub struct HubEventSource {
    hub: EventHub,
    store: Store,
}

impl HubEventSource {
    /// Combine a hub and a store
    pub const fn new(hub: EventHub, store: Store) -> Self {
        Self { hub, store }
    }
}

#[async_trait]
impl EventSource for HubEventSource {
    fn subscribe(&self, project: &str) -> Subscription {
        self.hub.subscribe(project)
    }

    async fn poll_ready(&self, project: &str) -> Result<Vec<MergeRequestRecord>> {
        self.store.ready_records(project).await
    }
}
