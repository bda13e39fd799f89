//! Policy for periodic update notifications

use crate::response::ResponseClass;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send the next update after the given delay
    Reschedule(Duration),

    /// No further updates are sent for the session
    Stop,
}

/// Strict sessions only tolerate a success. Otherwise anything but a failure is tolerated.
pub fn is_tolerated(class: ResponseClass, strict: bool) -> bool {
    match class {
        ResponseClass::Success => true,
        ResponseClass::Redirect => !strict,
        ResponseClass::Failure => false,
    }
}

/// Decides what follows an update exchange. `None` means the update never got a response
/// (transport error), which is handled the same as a failure.
///
/// An intolerable response stops the heartbeat without any further signal. The session itself
/// carries on unaffected.
pub fn evaluate(
    class: Option<ResponseClass>,
    strict: bool,
    update_timeout: Duration,
) -> HeartbeatAction {
    match class {
        Some(class) if is_tolerated(class, strict) && !update_timeout.is_zero() => {
            HeartbeatAction::Reschedule(update_timeout)
        }

        _ => HeartbeatAction::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn loose_policy_tolerates_redirects() {
        assert_eq!(
            evaluate(Some(ResponseClass::Success), false, TIMEOUT),
            HeartbeatAction::Reschedule(TIMEOUT)
        );

        assert_eq!(
            evaluate(Some(ResponseClass::Redirect), false, TIMEOUT),
            HeartbeatAction::Reschedule(TIMEOUT)
        );

        assert_eq!(
            evaluate(Some(ResponseClass::Failure), false, TIMEOUT),
            HeartbeatAction::Stop
        );
    }

    #[test]
    fn strict_policy_only_tolerates_success() {
        assert_eq!(
            evaluate(Some(ResponseClass::Success), true, TIMEOUT),
            HeartbeatAction::Reschedule(TIMEOUT)
        );

        assert_eq!(
            evaluate(Some(ResponseClass::Redirect), true, TIMEOUT),
            HeartbeatAction::Stop
        );
    }

    #[test]
    fn transport_error_stops_heartbeat() {
        assert_eq!(evaluate(None, false, TIMEOUT), HeartbeatAction::Stop);
    }

    #[test]
    fn zero_timeout_never_reschedules() {
        assert_eq!(
            evaluate(Some(ResponseClass::Success), false, Duration::ZERO),
            HeartbeatAction::Stop
        );
    }
}
