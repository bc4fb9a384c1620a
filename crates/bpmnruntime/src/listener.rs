use crate::activity::Activity;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// External observer of activity lifecycle.
///
/// Hooks are awaited by the branch that triggered them before it proceeds,
/// so `on_start` is the place to signal or otherwise intervene in a node.
#[async_trait]
pub trait ActivityListener: Send + Sync {
    /// Called when a token enters a node, before the node executes.
    async fn on_start(&self, _activity: &Activity) {}

    /// Called when a node completes, before its outgoing tokens are spawned.
    async fn on_end(&self, _activity: &Activity) {}
}

pub type ActivityHandler = Arc<dyn Fn(&Activity) + Send + Sync>;

/// Listener built from closures keyed by event name (`start-<id>`, `end-<id>`).
#[derive(Clone, Default)]
pub struct Listener {
    handlers: HashMap<String, Vec<ActivityHandler>>,
}

impl Listener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a named event.
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Activity) + Send + Sync + 'static,
    {
        self.handlers
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Shorthand for `on("start-<activity_id>", ...)`.
    pub fn when_started<F>(self, activity_id: &str, handler: F) -> Self
    where
        F: Fn(&Activity) + Send + Sync + 'static,
    {
        self.on(format!("start-{}", activity_id), handler)
    }

    /// Shorthand for `on("end-<activity_id>", ...)`.
    pub fn when_ended<F>(self, activity_id: &str, handler: F) -> Self
    where
        F: Fn(&Activity) + Send + Sync + 'static,
    {
        self.on(format!("end-{}", activity_id), handler)
    }

    fn dispatch(&self, event: &str, activity: &Activity) {
        if let Some(handlers) = self.handlers.get(event) {
            for handler in handlers {
                handler(activity);
            }
        }
    }
}

#[async_trait]
impl ActivityListener for Listener {
    async fn on_start(&self, activity: &Activity) {
        self.dispatch(&format!("start-{}", activity.id()), activity);
    }

    async fn on_end(&self, activity: &Activity) {
        self.dispatch(&format!("end-{}", activity.id()), activity);
    }
}
