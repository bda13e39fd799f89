//! Walks a player's candidate upstream origins in order until a usable one is found. Each full
//! pass that finds nothing usable counts as one reconnect attempt; the session actor is
//! responsible for waiting the reconnect gap between passes.

use crate::events::PlayEvent;
use crate::relay::{hashed_stream_name, is_rtmp_url, parse_rtmp_target, RelayTarget};
use tracing::{debug, warn};

/// The upstream chosen for a player, and the play request to resume once it's registered
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedUpstream {
    pub target: RelayTarget,

    /// The original play request, with its stream name replaced by the locally visible name
    pub play: PlayEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailoverStep {
    Resolved(ResolvedUpstream),

    /// No usable candidate this pass. The cursor was reset and the caller should try again
    /// after the reconnect gap.
    RetryScheduled,

    /// The attempt budget is used up
    Exhausted,
}

#[derive(Debug)]
pub struct FailoverEngine {
    candidates: Vec<String>,
    cursor: usize,
    attempts: u32,
    max_attempts: u32,
    relay_redirect: bool,
    play: PlayEvent,
}

impl FailoverEngine {
    pub fn new(
        candidates: Vec<String>,
        play: PlayEvent,
        max_attempts: u32,
        relay_redirect: bool,
    ) -> Self {
        FailoverEngine {
            candidates,
            cursor: 0,
            attempts: 0,
            max_attempts,
            relay_redirect,
            play,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Continues from the cursor to the next usable candidate. Candidates that aren't rtmp
    /// urls, or that can't be parsed, are skipped.
    pub fn next_upstream(&mut self) -> FailoverStep {
        while self.cursor < self.candidates.len() {
            let candidate = &self.candidates[self.cursor];
            self.cursor += 1;

            if !is_rtmp_url(candidate) {
                debug!(candidate = %candidate, "Skipping non-rtmp candidate");
                continue;
            }

            let target = match parse_rtmp_target(candidate, &self.play.stream_name) {
                Ok(target) => target,
                Err(error) => {
                    warn!(candidate = %candidate, "Skipping malformed candidate: {}", error);
                    continue;
                }
            };

            let mut play = self.play.clone();
            if self.relay_redirect {
                play.stream_name = hashed_stream_name(&target.url);
            }

            return FailoverStep::Resolved(ResolvedUpstream { target, play });
        }

        self.attempts = (self.attempts + 1).min(self.max_attempts);
        if self.attempts < self.max_attempts {
            debug!(
                attempts = self.attempts,
                max_attempts = self.max_attempts,
                "No usable candidate found, will retry"
            );

            self.cursor = 0;
            FailoverStep::RetryScheduled
        } else {
            FailoverStep::Exhausted
        }
    }
}
