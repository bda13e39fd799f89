//! Control plane client for mmids live streaming sessions. Every lifecycle event of a session
//! (connect, disconnect, publish, play, stream close, periodic update and recording completion)
//! is reported to an external control service over HTTP, and that service's response steers
//! the session. The control service can approve or deny the request, rename the stream,
//! redirect a publisher to push to another origin, or give a player a ranked list of upstream
//! origins that will be tried in order with automatic failover.
//!
//! Each session gets its own notify actor (see [`session::start_notify_session`]), which owns
//! all per-session notify state and timers. Media servers interact with it through the
//! [`hooks::HookChain`] by registering the session's handle as one of the chain's hooks.

extern crate pest;
#[macro_use]
extern crate pest_derive;

pub mod actor_utils;
pub mod addresses;
pub mod config;
pub mod events;
pub mod failover;
pub mod heartbeat;
pub mod hooks;
pub mod relay;
pub mod requests;
pub mod response;
pub mod session;
pub mod transport;
mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::fmt::Formatter;
use std::future::Future;
use tracing::error;
use uuid::Uuid;

/// Unique identifier for a single client session (one RTMP connection). It is used to correlate
/// log entries across every notification made on behalf of the session, and is handed to relay
/// and live subscriber collaborators so they know which session a request is for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Executes the future, and will log if an error returns
fn spawn_and_log<F, E>(future: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display,
{
    tokio::spawn(async move {
        if let Err(error) = future.await {
            error!("Error occurred: {}", error);
        }
    });
}
