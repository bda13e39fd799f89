//! Per-session notify client. Each session gets its own actor, which owns the session's notify
//! state and timers, issues every notification on the session's behalf and applies the control
//! service's decisions. Since a single task runs all of a session's notify logic, exchanges
//! for one session never overlap, while separate sessions run fully independently.

mod actor;
mod state;

#[cfg(test)]
mod tests;

use crate::actor_utils::notify_on_unbounded_recv;
use crate::config::NotifyConfig;
use crate::events::{ConnectEvent, PlayEvent, PublishEvent, RecordDoneEvent};
use crate::hooks::{HookDecision, LifecycleHook};
use crate::relay::{RelayRequest, SubscriberRequest};
use crate::transport::NotifyTransport;
use crate::SessionId;
use actor::{FutureResult, NotifySessionActor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tracing::warn;

/// Read-only details about the connection the session belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub peer_address: String,

    /// Numeric id of the connection, reported as `clientid`
    pub client_id: u64,

    /// Connection epoch, reported on connect
    pub epoch: u32,

    /// Relay (and auto pushed) sessions are created by the server itself and are never
    /// reported to the control service.
    pub is_relay: bool,
}

/// Which close-time notifications a session owes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActiveRoles {
    pub publishing: bool,
    pub playing: bool,
}

impl ActiveRoles {
    pub fn any(&self) -> bool {
        self.publishing || self.playing
    }
}

/// Channels to the subsystems the notify client drives but does not implement
#[derive(Clone)]
pub struct SessionCollaborators {
    pub relay: UnboundedSender<RelayRequest>,
    pub subscribers: UnboundedSender<SubscriberRequest>,

    /// Latest media timestamp of the session's stream, maintained by the media path
    pub media_timestamp: watch::Receiver<u32>,
}

#[derive(Debug)]
pub enum NotifySessionRequest {
    Connect {
        event: ConnectEvent,
        response_channel: oneshot::Sender<HookDecision<ConnectEvent>>,
    },

    Disconnect,

    Publish {
        event: PublishEvent,
        response_channel: oneshot::Sender<HookDecision<PublishEvent>>,
    },

    Play {
        event: PlayEvent,
        response_channel: oneshot::Sender<HookDecision<PlayEvent>>,
    },

    CloseStream,

    RecordDone {
        event: RecordDoneEvent,
    },

    /// The upstream a player was pulled from went away
    UpstreamFailed,
}

/// Handle to a session's notify actor. The actor fires any owed close-time notifications and
/// shuts down once every handle is dropped, or once a disconnect has been processed.
#[derive(Clone)]
pub struct NotifySessionHandle {
    sender: UnboundedSender<NotifySessionRequest>,
}

/// Starts the notify actor for a new session
pub fn start_notify_session(
    config: Arc<NotifyConfig>,
    identity: SessionIdentity,
    transport: Arc<dyn NotifyTransport>,
    collaborators: SessionCollaborators,
) -> NotifySessionHandle {
    let (sender, receiver) = unbounded_channel();
    let (actor_sender, actor_receiver) = unbounded_channel();

    notify_on_unbounded_recv(
        receiver,
        actor_sender.clone(),
        FutureResult::RequestReceived,
        || FutureResult::AllHandlesGone,
    );

    let actor = NotifySessionActor::new(config, identity, transport, collaborators, actor_sender);
    tokio::spawn(actor.run(actor_receiver));

    NotifySessionHandle { sender }
}

impl NotifySessionHandle {
    /// Reports that the upstream a player was pulled from failed, so the next candidate origin
    /// is tried.
    pub fn report_upstream_failure(&self) {
        let _ = self.sender.send(NotifySessionRequest::UpstreamFailed);
    }

    async fn request_decision<T: Send>(
        &self,
        request: NotifySessionRequest,
        receiver: oneshot::Receiver<HookDecision<T>>,
    ) -> HookDecision<T> {
        if self.sender.send(request).is_err() {
            warn!("Notify session actor is gone, denying request");
            return HookDecision::Deny;
        }

        match receiver.await {
            Ok(decision) => decision,
            Err(_) => {
                warn!("Notify session actor closed before responding, denying request");
                HookDecision::Deny
            }
        }
    }
}

#[async_trait]
impl LifecycleHook for NotifySessionHandle {
    async fn on_connect(&self, event: ConnectEvent) -> HookDecision<ConnectEvent> {
        let (response_channel, receiver) = oneshot::channel();
        let request = NotifySessionRequest::Connect {
            event,
            response_channel,
        };

        self.request_decision(request, receiver).await
    }

    async fn on_disconnect(&self) {
        let _ = self.sender.send(NotifySessionRequest::Disconnect);
    }

    async fn on_publish(&self, event: PublishEvent) -> HookDecision<PublishEvent> {
        let (response_channel, receiver) = oneshot::channel();
        let request = NotifySessionRequest::Publish {
            event,
            response_channel,
        };

        self.request_decision(request, receiver).await
    }

    async fn on_play(&self, event: PlayEvent) -> HookDecision<PlayEvent> {
        let (response_channel, receiver) = oneshot::channel();
        let request = NotifySessionRequest::Play {
            event,
            response_channel,
        };

        self.request_decision(request, receiver).await
    }

    async fn on_close_stream(&self) {
        let _ = self.sender.send(NotifySessionRequest::CloseStream);
    }

    async fn on_record_done(&self, event: RecordDoneEvent) {
        let _ = self.sender.send(NotifySessionRequest::RecordDone { event });
    }
}
