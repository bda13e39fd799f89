use super::state::SessionNotifyState;
use super::{NotifySessionRequest, SessionCollaborators, SessionIdentity};
use crate::actor_utils::notify_on_future_completion;
use crate::addresses;
use crate::config::{EventKind, NotifyConfig, NotifyEndpoint, NotifyScope};
use crate::events::{ConnectEvent, PlayEvent, PublishEvent, RecordDoneEvent};
use crate::failover::{FailoverEngine, FailoverStep};
use crate::heartbeat::{self, HeartbeatAction};
use crate::hooks::HookDecision;
use crate::relay::{
    hashed_stream_name, is_rtmp_url, parse_rtmp_target, RelayRequest, SubscriberRequest,
};
use crate::requests::{self, UpdateDetails};
use crate::response::{NotifyResponse, ResponseClass};
use crate::spawn_and_log;
use crate::transport::{NotifyRequest, NotifyTransport, TransportError};
use crate::utils::{bounded, MAX_LOCATION_LENGTH, MAX_NAME_LENGTH};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot::Sender;
use tracing::{debug, info, instrument, warn};

type ExchangeResult = Result<NotifyResponse, TransportError>;

pub enum FutureResult {
    AllHandlesGone,
    RequestReceived(NotifySessionRequest),

    ConnectResponse {
        exchange_id: u64,
        result: ExchangeResult,
    },

    PublishResponse {
        exchange_id: u64,
        result: ExchangeResult,
    },

    PlayResponse {
        exchange_id: u64,
        result: ExchangeResult,
    },

    UpdateResponse {
        state_epoch: u64,
        result: ExchangeResult,
    },

    HeartbeatDue {
        generation: u64,
    },

    ReconnectDue {
        generation: u64,
    },
}

struct PendingDecision<T> {
    exchange_id: u64,
    event: T,
    response_channel: Sender<HookDecision<T>>,
}

/// Play request whose decision is waiting on an upstream to be chosen
struct PendingFailover {
    response_channel: Sender<HookDecision<PlayEvent>>,
}

pub struct NotifySessionActor {
    internal_sender: UnboundedSender<FutureResult>,
    config: Arc<NotifyConfig>,
    identity: SessionIdentity,
    transport: Arc<dyn NotifyTransport>,
    collaborators: SessionCollaborators,
    connect: ConnectEvent,
    state: Option<SessionNotifyState>,
    next_exchange_id: u64,
    next_state_epoch: u64,
    pending_connect: Option<PendingDecision<ConnectEvent>>,
    pending_publish: Option<PendingDecision<PublishEvent>>,
    pending_play: Option<PendingDecision<PlayEvent>>,
    pending_failover: Option<PendingFailover>,
}

enum LoopControl {
    Continue,
    Stop,
}

impl NotifySessionActor {
    pub fn new(
        config: Arc<NotifyConfig>,
        identity: SessionIdentity,
        transport: Arc<dyn NotifyTransport>,
        collaborators: SessionCollaborators,
        internal_sender: UnboundedSender<FutureResult>,
    ) -> Self {
        NotifySessionActor {
            internal_sender,
            config,
            identity,
            transport,
            collaborators,
            connect: ConnectEvent::default(),
            state: None,
            next_exchange_id: 0,
            next_state_epoch: 0,
            pending_connect: None,
            pending_publish: None,
            pending_play: None,
            pending_failover: None,
        }
    }

    #[instrument(
        name = "Notify Session Execution",
        skip_all,
        fields(session_id = %self.identity.session_id)
    )]
    pub async fn run(mut self, mut actor_receiver: UnboundedReceiver<FutureResult>) {
        debug!("Starting notify session");

        while let Some(result) = actor_receiver.recv().await {
            match result {
                FutureResult::AllHandlesGone => {
                    debug!("All notify session handles gone");
                    self.close_stream();
                    break;
                }

                FutureResult::RequestReceived(request) => {
                    if let LoopControl::Stop = self.handle_request(request) {
                        break;
                    }
                }

                FutureResult::ConnectResponse {
                    exchange_id,
                    result,
                } => {
                    self.handle_connect_response(exchange_id, result);
                }

                FutureResult::PublishResponse {
                    exchange_id,
                    result,
                } => {
                    self.handle_publish_response(exchange_id, result);
                }

                FutureResult::PlayResponse {
                    exchange_id,
                    result,
                } => {
                    self.handle_play_response(exchange_id, result);
                }

                FutureResult::UpdateResponse {
                    state_epoch,
                    result,
                } => {
                    self.handle_update_response(state_epoch, result);
                }

                FutureResult::HeartbeatDue { generation } => {
                    self.handle_heartbeat_due(generation);
                }

                FutureResult::ReconnectDue { generation } => {
                    let is_current = match &mut self.state {
                        Some(state) => state.reconnect.fire(generation),
                        None => false,
                    };

                    if is_current {
                        debug!("Reconnect gap elapsed, retrying candidate addresses");
                        self.run_failover();
                    }
                }
            }
        }

        debug!("Notify session closing");
    }

    fn handle_request(&mut self, request: NotifySessionRequest) -> LoopControl {
        match request {
            NotifySessionRequest::Connect {
                event,
                response_channel,
            } => self.handle_connect(event, response_channel),

            NotifySessionRequest::Disconnect => {
                self.handle_disconnect();
                return LoopControl::Stop;
            }

            NotifySessionRequest::Publish {
                event,
                response_channel,
            } => self.handle_publish(event, response_channel),

            NotifySessionRequest::Play {
                event,
                response_channel,
            } => self.handle_play(event, response_channel),

            NotifySessionRequest::CloseStream => self.close_stream(),
            NotifySessionRequest::RecordDone { event } => self.handle_record_done(event),
            NotifySessionRequest::UpstreamFailed => self.handle_upstream_failed(),
        }

        LoopControl::Continue
    }

    fn handle_connect(
        &mut self,
        event: ConnectEvent,
        response_channel: Sender<HookDecision<ConnectEvent>>,
    ) {
        if self.identity.is_relay {
            let _ = response_channel.send(HookDecision::Proceed(event));
            return;
        }

        if self.pending_connect.is_some() {
            warn!("Connect received while a connect notification is outstanding");
            let _ = response_channel.send(HookDecision::Deny);
            return;
        }

        let endpoint = match self.config.server().endpoint(EventKind::Connect) {
            Some(endpoint) => endpoint.clone(),
            None => {
                self.connect = event.clone();
                let _ = response_channel.send(HookDecision::Proceed(event));
                return;
            }
        };

        let body = requests::connect_body(&self.identity, &event);
        let exchange_id = self.next_exchange_id();
        let future = self.send_notification(&endpoint, EventKind::Connect, body);
        notify_on_future_completion(future, self.internal_sender.clone(), move |result| {
            FutureResult::ConnectResponse {
                exchange_id,
                result,
            }
        });

        self.pending_connect = Some(PendingDecision {
            exchange_id,
            event,
            response_channel,
        });
    }

    fn handle_connect_response(&mut self, exchange_id: u64, result: ExchangeResult) {
        let pending = match self.pending_connect.take() {
            Some(pending) if pending.exchange_id == exchange_id => pending,
            other => {
                self.pending_connect = other;
                return;
            }
        };

        let mut event = pending.event;
        let response = match classify(EventKind::Connect, result) {
            Some(response) => response,
            None => {
                let _ = pending.response_channel.send(HookDecision::Deny);
                return;
            }
        };

        if response.class() == ResponseClass::Redirect {
            match response.header("location", MAX_LOCATION_LENGTH) {
                Some(location) if !location.is_empty() => {
                    info!(
                        app = %event.app,
                        new_app = %location,
                        "Connect redirected to a different application"
                    );

                    event.app = location;
                }

                _ => warn!("Connect redirect had no location, keeping application"),
            }
        }

        self.connect = event.clone();
        let _ = pending.response_channel.send(HookDecision::Proceed(event));
    }

    fn handle_disconnect(&mut self) {
        if self.identity.is_relay {
            return;
        }

        if let Some(endpoint) = self.config.server().endpoint(EventKind::Disconnect) {
            let body = requests::disconnect_body(&self.identity, &self.connect);
            self.fire_and_forget(endpoint, EventKind::Disconnect, body);
        }

        self.close_stream();
    }

    fn handle_publish(
        &mut self,
        event: PublishEvent,
        response_channel: Sender<HookDecision<PublishEvent>>,
    ) {
        if self.identity.is_relay {
            let _ = response_channel.send(HookDecision::Proceed(event));
            return;
        }

        if self.pending_publish.is_some() {
            warn!("Publish received while a publish notification is outstanding");
            let _ = response_channel.send(HookDecision::Deny);
            return;
        }

        let config = self.config.clone();
        let scope = config.application(&self.connect.app);
        if !scope.is_active() {
            let _ = response_channel.send(HookDecision::Proceed(event));
            return;
        }

        self.init_state(scope, &event.stream_name, &event.args, true);

        let endpoint = match scope.endpoint(EventKind::Publish) {
            Some(endpoint) => endpoint,
            None => {
                let _ = response_channel.send(HookDecision::Proceed(event));
                return;
            }
        };

        let body = requests::publish_body(&self.identity, &self.connect, &event);
        let exchange_id = self.next_exchange_id();
        let future = self.send_notification(endpoint, EventKind::Publish, body);
        notify_on_future_completion(future, self.internal_sender.clone(), move |result| {
            FutureResult::PublishResponse {
                exchange_id,
                result,
            }
        });

        self.pending_publish = Some(PendingDecision {
            exchange_id,
            event,
            response_channel,
        });
    }

    fn handle_publish_response(&mut self, exchange_id: u64, result: ExchangeResult) {
        let pending = match self.pending_publish.take() {
            Some(pending) if pending.exchange_id == exchange_id => pending,
            other => {
                self.pending_publish = other;
                return;
            }
        };

        let mut event = pending.event;
        let response = match classify(EventKind::Publish, result) {
            Some(response) => response,
            None => {
                if let Some(state) = &mut self.state {
                    state.roles.publishing = false;
                }

                let _ = pending.response_channel.send(HookDecision::Deny);
                return;
            }
        };

        if response.class() == ResponseClass::Redirect {
            let location = response
                .header("location", MAX_LOCATION_LENGTH)
                .filter(|location| !location.is_empty());

            match location {
                Some(location) if is_rtmp_url(&location) => {
                    match self.start_push(&location, &event.stream_name) {
                        Some(local_name) => event.stream_name = local_name,
                        None => {
                            let _ = pending.response_channel.send(HookDecision::Deny);
                            return;
                        }
                    }
                }

                Some(location) => {
                    info!(
                        stream_name = %event.stream_name,
                        new_name = %location,
                        "Publish redirected to a local stream name"
                    );

                    event.stream_name = bounded(&location, MAX_NAME_LENGTH);
                }

                None => warn!("Publish redirect had no location, keeping stream name"),
            }

            if let Some(state) = &mut self.state {
                state.stream_name = event.stream_name.clone();
            }
        }

        let _ = pending.response_channel.send(HookDecision::Proceed(event));
    }

    /// Registers a push toward the redirect target and returns the local stream name to publish
    /// under, or `None` if the target can't be used.
    fn start_push(&self, location: &str, stream_name: &str) -> Option<String> {
        let target = match parse_rtmp_target(location, stream_name) {
            Ok(target) => target,
            Err(error) => {
                warn!("Publish redirect target was invalid: {}", error);
                return None;
            }
        };

        let scope = self.config.application(&self.connect.app);
        let local_name = if scope.relay_redirect {
            hashed_stream_name(&target.url)
        } else {
            stream_name.to_string()
        };

        info!(
            stream_name = %local_name,
            target = %target.url,
            "Publish redirected, pushing to upstream"
        );

        let _ = self.collaborators.relay.send(RelayRequest::Push {
            session_id: self.identity.session_id.clone(),
            local_name: local_name.clone(),
            target,
        });

        Some(local_name)
    }

    fn handle_play(
        &mut self,
        event: PlayEvent,
        response_channel: Sender<HookDecision<PlayEvent>>,
    ) {
        if self.identity.is_relay || event.silent {
            let _ = response_channel.send(HookDecision::Proceed(event));
            return;
        }

        if self.pending_play.is_some() || self.pending_failover.is_some() {
            warn!("Play received while a play notification is outstanding");
            let _ = response_channel.send(HookDecision::Deny);
            return;
        }

        let config = self.config.clone();
        let scope = config.application(&self.connect.app);
        if !scope.is_active() {
            let _ = response_channel.send(HookDecision::Proceed(event));
            return;
        }

        self.init_state(scope, &event.stream_name, &event.args, false);

        let endpoint = match scope.endpoint(EventKind::Play) {
            Some(endpoint) => endpoint,
            None => {
                let _ = response_channel.send(HookDecision::Proceed(event));
                return;
            }
        };

        let body = requests::play_body(&self.identity, &self.connect, &event);
        let exchange_id = self.next_exchange_id();
        let future = self.send_notification(endpoint, EventKind::Play, body);
        notify_on_future_completion(future, self.internal_sender.clone(), move |result| {
            FutureResult::PlayResponse {
                exchange_id,
                result,
            }
        });

        self.pending_play = Some(PendingDecision {
            exchange_id,
            event,
            response_channel,
        });
    }

    fn handle_play_response(&mut self, exchange_id: u64, result: ExchangeResult) {
        let pending = match self.pending_play.take() {
            Some(pending) if pending.exchange_id == exchange_id => pending,
            other => {
                self.pending_play = other;
                return;
            }
        };

        let response = match classify(EventKind::Play, result) {
            Some(response) => response,
            None => {
                if let Some(state) = &mut self.state {
                    state.roles.playing = false;
                }

                let _ = pending.response_channel.send(HookDecision::Deny);
                return;
            }
        };

        let candidates = match response.class() {
            ResponseClass::Redirect => {
                addresses::from_redirect(response.header("location", MAX_LOCATION_LENGTH))
            }

            _ => response
                .body()
                .and_then(|body| addresses::from_json_body(&body)),
        };

        let candidates = match candidates {
            Some(candidates) => candidates,
            None => {
                let _ = pending.response_channel.send(HookDecision::Proceed(pending.event));
                return;
            }
        };

        let state = match &mut self.state {
            Some(state) => state,
            None => {
                let _ = pending.response_channel.send(HookDecision::Proceed(pending.event));
                return;
            }
        };

        info!(
            stream_name = %pending.event.stream_name,
            candidates = candidates.len(),
            "Play has upstream candidates, starting failover"
        );

        let scope = self.config.application(&self.connect.app);
        state.clear_failover();
        state.failover = Some(FailoverEngine::new(
            candidates,
            pending.event,
            scope.max_reconnect_attempts(),
            scope.relay_redirect,
        ));

        self.pending_failover = Some(PendingFailover {
            response_channel: pending.response_channel,
        });

        self.run_failover();
    }

    /// Advances the failover engine and acts on its outcome. When a player is waiting on the
    /// outcome it gets its decision here, otherwise the outcome only affects relays.
    fn run_failover(&mut self) {
        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        let step = match &mut state.failover {
            Some(engine) => engine.next_upstream(),
            None => return,
        };

        match step {
            FailoverStep::Resolved(upstream) => {
                info!(
                    stream_name = %upstream.play.stream_name,
                    target = %upstream.target.url,
                    "Pulling stream from upstream"
                );

                // The player has to be released from its current upstream before the new pull
                // is registered.
                let _ = self.collaborators.subscribers.send(SubscriberRequest::Rebind {
                    session_id: self.identity.session_id.clone(),
                });

                let _ = self.collaborators.relay.send(RelayRequest::Pull {
                    session_id: self.identity.session_id.clone(),
                    local_name: upstream.play.stream_name.clone(),
                    target: upstream.target,
                });

                state.stream_name = upstream.play.stream_name.clone();
                if let Some(pending) = self.pending_failover.take() {
                    let _ = pending.response_channel.send(HookDecision::Proceed(upstream.play));
                }
            }

            FailoverStep::RetryScheduled => {
                let gap = self.config.application(&self.connect.app).reconnect_time_gap;
                debug!(delay = ?gap, "Scheduling candidate address retry");

                state.reconnect.schedule(gap, self.internal_sender.clone(), |generation| {
                    FutureResult::ReconnectDue { generation }
                });
            }

            FailoverStep::Exhausted => {
                warn!("No usable upstream found within the reconnect budget");
                state.clear_failover();
                if let Some(pending) = self.pending_failover.take() {
                    let _ = pending.response_channel.send(HookDecision::Deny);
                }
            }
        }
    }

    fn handle_upstream_failed(&mut self) {
        if self.pending_failover.is_some() {
            // Already looking for an upstream
            return;
        }

        let state = match &self.state {
            Some(state) => state,
            None => return,
        };

        if state.failover.is_none() || state.reconnect.is_scheduled() {
            return;
        }

        info!("Upstream failed, trying next candidate address");
        self.run_failover();
    }

    fn handle_record_done(&mut self, event: RecordDoneEvent) {
        if self.identity.is_relay {
            return;
        }

        let config = self.config.clone();
        let scope = config.application(&self.connect.app);
        let endpoint = match scope.endpoint(EventKind::RecordDone) {
            Some(endpoint) => endpoint,
            None => return,
        };

        let (stream_name, args) = match &self.state {
            Some(state) => (state.stream_name.as_str(), state.stream_args.as_str()),
            None => ("", ""),
        };

        let body =
            requests::record_done_body(&self.identity, &self.connect, &event, stream_name, args);
        self.fire_and_forget(endpoint, EventKind::RecordDone, body);
    }

    fn handle_heartbeat_due(&mut self, generation: u64) {
        let config = self.config.clone();
        let scope = config.application(&self.connect.app);
        let endpoint = match scope.endpoint(EventKind::Update) {
            Some(endpoint) => endpoint,
            None => return,
        };

        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        if !state.heartbeat.fire(generation) {
            return;
        }

        let details = UpdateDetails {
            roles: state.roles,
            elapsed: state.started_at.elapsed(),
            media_timestamp: *self.collaborators.media_timestamp.borrow(),
            stream_name: &state.stream_name,
            args: &state.stream_args,
        };

        let body = requests::update_body(&self.identity, &self.connect, &details);
        state.update_in_flight = true;

        let state_epoch = state.epoch;
        let future = self.send_notification(endpoint, EventKind::Update, body);
        notify_on_future_completion(future, self.internal_sender.clone(), move |result| {
            FutureResult::UpdateResponse {
                state_epoch,
                result,
            }
        });
    }

    fn handle_update_response(&mut self, state_epoch: u64, result: ExchangeResult) {
        let state = match &mut self.state {
            Some(state) if state.epoch == state_epoch => state,
            _ => return,
        };

        state.update_in_flight = false;

        let class = match result {
            Ok(response) => Some(response.class()),
            Err(error) => {
                warn!("Update notification failed: {}", error);
                None
            }
        };

        let scope = self.config.application(&self.connect.app);
        match heartbeat::evaluate(class, scope.update_strict, scope.update_timeout) {
            HeartbeatAction::Reschedule(delay) => {
                if !state.heartbeat.is_scheduled() {
                    debug!(delay = ?delay, "Scheduling next update");
                    state.heartbeat.schedule(delay, self.internal_sender.clone(), |generation| {
                        FutureResult::HeartbeatDue { generation }
                    });
                }
            }

            HeartbeatAction::Stop => {
                warn!(
                    class = ?class,
                    strict = scope.update_strict,
                    "Update response not tolerated, no further updates will be sent"
                );
            }
        }
    }

    /// Creates the session's notify state if needed, records the role, and starts the
    /// heartbeat if it isn't already running.
    fn init_state(
        &mut self,
        scope: &NotifyScope,
        stream_name: &str,
        stream_args: &str,
        publishing: bool,
    ) {
        if self.state.is_none() {
            self.next_state_epoch += 1;
            self.state = Some(SessionNotifyState::new(self.next_state_epoch));
        }

        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        state.capture_stream(stream_name, stream_args);
        state.clear_failover();
        if publishing {
            state.roles.publishing = true;
        } else {
            state.roles.playing = true;
        }

        let heartbeat_enabled =
            scope.endpoint(EventKind::Update).is_some() && !scope.update_timeout.is_zero();

        if heartbeat_enabled && !state.heartbeat.is_scheduled() && !state.update_in_flight {
            debug!(delay = ?scope.update_timeout, "Scheduling first update");
            state.heartbeat.schedule(
                scope.update_timeout,
                self.internal_sender.clone(),
                |generation| FutureResult::HeartbeatDue { generation },
            );
        }
    }

    /// Fires the owed close-time notifications and releases the session's notify state
    fn close_stream(&mut self) {
        // Decisions still outstanding are moot once the stream is gone
        if let Some(pending) = self.pending_publish.take() {
            let _ = pending.response_channel.send(HookDecision::Deny);
        }

        if let Some(pending) = self.pending_play.take() {
            let _ = pending.response_channel.send(HookDecision::Deny);
        }

        if let Some(pending) = self.pending_failover.take() {
            let _ = pending.response_channel.send(HookDecision::Deny);
        }

        let mut state = match self.state.take() {
            Some(state) => state,
            None => return,
        };

        let roles = state.teardown();
        let config = self.config.clone();
        let scope = config.application(&self.connect.app);

        let mut owed = Vec::new();
        if roles.publishing {
            owed.push(EventKind::PublishDone);
        }

        if roles.playing {
            owed.push(EventKind::PlayDone);
        }

        if roles.any() {
            owed.push(EventKind::Done);
        }

        for kind in owed {
            if let Some(endpoint) = scope.endpoint(kind) {
                let body = requests::done_body(
                    &self.identity,
                    &self.connect,
                    kind,
                    &state.stream_name,
                    &state.stream_args,
                );

                self.fire_and_forget(endpoint, kind, body);
            }
        }
    }

    fn next_exchange_id(&mut self) -> u64 {
        self.next_exchange_id += 1;
        self.next_exchange_id
    }

    fn send_notification(
        &self,
        endpoint: &NotifyEndpoint,
        kind: EventKind,
        body: String,
    ) -> BoxFuture<'static, ExchangeResult> {
        info!(url = %endpoint.url, call = kind.call_name(), "Sending notification");

        self.transport.send(NotifyRequest {
            method: endpoint.method,
            url: endpoint.url.clone(),
            body,
        })
    }

    /// Sends a notification whose response only gets logged
    fn fire_and_forget(&self, endpoint: &NotifyEndpoint, kind: EventKind, body: String) {
        let future = self.send_notification(endpoint, kind, body);
        spawn_and_log(async move {
            let response = future.await?;
            debug!(
                call = kind.call_name(),
                class = ?response.class(),
                "Notification acknowledged"
            );

            Ok::<_, TransportError>(())
        });
    }
}

/// Returns the response unless it is a failure. Transport errors are failures.
fn classify(kind: EventKind, result: ExchangeResult) -> Option<NotifyResponse> {
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            warn!(call = kind.call_name(), "Notification failed: {}", error);
            return None;
        }
    };

    match response.class() {
        ResponseClass::Failure => {
            info!(call = kind.call_name(), "Control service denied the request");
            None
        }

        _ => Some(response),
    }
}
