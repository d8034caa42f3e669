//! Lifecycle events for source records and the bus that dispatches them.
//!
//! Whoever mutates records emits events on the bus; subscribers (normally the
//! sync pipeline) run inline, in subscription order, before `emit` returns.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::ModelKey;
use crate::value::Record;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A record mutation. Deletions only carry the primary key.
#[derive(Clone)]
pub enum LifecycleEvent {
    Created(Arc<dyn Record>),
    Updated(Arc<dyn Record>),
    Deleted { model: ModelKey, pk: String },
}

impl LifecycleEvent {
    pub fn deleted(model: ModelKey, pk: impl fmt::Display) -> Self {
        Self::Deleted {
            model,
            pk: pk.to_string(),
        }
    }

    pub fn kind(&self) -> LifecycleKind {
        match self {
            Self::Created(_) => LifecycleKind::Created,
            Self::Updated(_) => LifecycleKind::Updated,
            Self::Deleted { .. } => LifecycleKind::Deleted,
        }
    }

    pub fn model(&self) -> &ModelKey {
        match self {
            Self::Created(record) | Self::Updated(record) => record.model(),
            Self::Deleted { model, .. } => model,
        }
    }

    pub fn pk(&self) -> String {
        match self {
            Self::Created(record) | Self::Updated(record) => record.pk(),
            Self::Deleted { pk, .. } => pk.clone(),
        }
    }
}

impl fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("kind", &self.kind())
            .field("model", &self.model().to_string())
            .field("pk", &self.pk())
            .finish()
    }
}

#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    model: ModelKey,
    kind: LifecycleKind,
    handler: Arc<dyn LifecycleHandler>,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        model: ModelKey,
        kind: LifecycleKind,
        handler: Arc<dyn LifecycleHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            model,
            kind,
            handler,
        });
        id
    }

    pub fn on_created(&self, model: ModelKey, handler: Arc<dyn LifecycleHandler>) -> SubscriptionId {
        self.subscribe(model, LifecycleKind::Created, handler)
    }

    pub fn on_updated(&self, model: ModelKey, handler: Arc<dyn LifecycleHandler>) -> SubscriptionId {
        self.subscribe(model, LifecycleKind::Updated, handler)
    }

    pub fn on_deleted(&self, model: ModelKey, handler: Arc<dyn LifecycleHandler>) -> SubscriptionId {
        self.subscribe(model, LifecycleKind::Deleted, handler)
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn has_subscribers(&self, model: &ModelKey, kind: LifecycleKind) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|s| &s.model == model && s.kind == kind)
    }

    /// Run every handler subscribed to the event's model and kind. All
    /// handlers run; the first failure is returned.
    pub async fn emit(&self, event: LifecycleEvent) -> Result<()> {
        let handlers: Vec<Arc<dyn LifecycleHandler>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| &s.model == event.model() && s.kind == event.kind())
            .map(|s| s.handler.clone())
            .collect();

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler.handle(&event).await {
                tracing::warn!(
                    model = %event.model(),
                    kind = %event.kind(),
                    pk = %event.pk(),
                    error = %e,
                    "Lifecycle handler failed"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
