//! Ordered lifecycle hooks for a session. Every hook sees the event as rewritten by the hooks
//! registered before it, and the first hook to deny an event stops it from going further.

use crate::events::{ConnectEvent, PlayEvent, PublishEvent, RecordDoneEvent};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookDecision<T> {
    /// Continue with the (possibly rewritten) event
    Proceed(T),
    Deny,
}

/// Participant in a session's lifecycle. Every method defaults to letting the event through
/// unchanged, so implementations only override the events they care about.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    async fn on_connect(&self, event: ConnectEvent) -> HookDecision<ConnectEvent> {
        HookDecision::Proceed(event)
    }

    async fn on_disconnect(&self) {}

    async fn on_publish(&self, event: PublishEvent) -> HookDecision<PublishEvent> {
        HookDecision::Proceed(event)
    }

    async fn on_play(&self, event: PlayEvent) -> HookDecision<PlayEvent> {
        HookDecision::Proceed(event)
    }

    async fn on_close_stream(&self) {}

    async fn on_record_done(&self, _event: RecordDoneEvent) {}
}

#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        HookChain { hooks: Vec::new() }
    }

    /// Adds a hook to the end of the chain
    pub fn register(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    pub async fn connect(&self, mut event: ConnectEvent) -> HookDecision<ConnectEvent> {
        for hook in &self.hooks {
            event = match hook.on_connect(event).await {
                HookDecision::Proceed(event) => event,
                HookDecision::Deny => return HookDecision::Deny,
            };
        }

        HookDecision::Proceed(event)
    }

    pub async fn disconnect(&self) {
        for hook in &self.hooks {
            hook.on_disconnect().await;
        }
    }

    pub async fn publish(&self, mut event: PublishEvent) -> HookDecision<PublishEvent> {
        for hook in &self.hooks {
            event = match hook.on_publish(event).await {
                HookDecision::Proceed(event) => event,
                HookDecision::Deny => return HookDecision::Deny,
            };
        }

        HookDecision::Proceed(event)
    }

    pub async fn play(&self, mut event: PlayEvent) -> HookDecision<PlayEvent> {
        for hook in &self.hooks {
            event = match hook.on_play(event).await {
                HookDecision::Proceed(event) => event,
                HookDecision::Deny => return HookDecision::Deny,
            };
        }

        HookDecision::Proceed(event)
    }

    pub async fn close_stream(&self) {
        for hook in &self.hooks {
            hook.on_close_stream().await;
        }
    }

    pub async fn record_done(&self, event: RecordDoneEvent) {
        for hook in &self.hooks {
            hook.on_record_done(event.clone()).await;
        }
    }
}
