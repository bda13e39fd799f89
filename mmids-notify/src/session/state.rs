use crate::actor_utils::TimerSlot;
use crate::failover::FailoverEngine;
use crate::session::ActiveRoles;
use crate::utils::{bounded, MAX_ARGS_LENGTH, MAX_NAME_LENGTH};
use tokio::time::Instant;

/// Notify bookkeeping for a session with an active publish or play. Created lazily by the first
/// publish or play in a notify enabled application, and released when the stream closes.
pub struct SessionNotifyState {
    /// Distinguishes this state from earlier ones of the same session, so responses to
    /// exchanges started for a released state can be recognized
    pub epoch: u64,

    pub stream_name: String,
    pub stream_args: String,
    pub roles: ActiveRoles,
    pub started_at: Instant,

    pub heartbeat: TimerSlot,
    pub update_in_flight: bool,

    pub failover: Option<FailoverEngine>,
    pub reconnect: TimerSlot,
}

impl SessionNotifyState {
    pub fn new(epoch: u64) -> Self {
        SessionNotifyState {
            epoch,
            stream_name: String::new(),
            stream_args: String::new(),
            roles: ActiveRoles::default(),
            started_at: Instant::now(),
            heartbeat: TimerSlot::default(),
            update_in_flight: false,
            failover: None,
            reconnect: TimerSlot::default(),
        }
    }

    /// Names and args over the length limit are truncated
    pub fn capture_stream(&mut self, stream_name: &str, stream_args: &str) {
        self.stream_name = bounded(stream_name, MAX_NAME_LENGTH);
        self.stream_args = bounded(stream_args, MAX_ARGS_LENGTH);
    }

    /// Drops any in progress failover, including its pending retry
    pub fn clear_failover(&mut self) {
        self.reconnect.cancel();
        self.failover = None;
    }

    /// Cancels all timers and returns the roles whose close-time notifications are owed
    pub fn teardown(&mut self) -> ActiveRoles {
        self.heartbeat.cancel();
        self.clear_failover();

        std::mem::take(&mut self.roles)
    }
}
