//! Reconnection policy: fixed-interval, bounded retry.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Decides whether and when another connection attempt may be made.
///
/// The policy is pure: it never mutates the attempt counter itself. The
/// connection manager owns the counter, resets it on every authenticated
/// connection, and asks the policy before scheduling a redial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Returns the delay before the next attempt, or `None` once the budget
    /// is spent (`attempt >= max_attempts`).
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.interval)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Classifies a close as abnormal (reconnect-worthy) or intentional.
///
/// Code 1000 is a normal closure; any other code, or a connection that died
/// without a close frame at all, triggers the reconnect path.
pub fn close_is_abnormal(frame: Option<&CloseFrame<'_>>) -> bool {
    match frame {
        Some(frame) => frame.code != CloseCode::Normal,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_attempts_below_the_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(500)));
    }

    #[test]
    fn refuses_attempts_at_and_past_the_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(10), None);
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn close_code_1000_is_normal() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        };
        assert!(!close_is_abnormal(Some(&frame)));
    }

    #[test]
    fn other_close_codes_are_abnormal() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "server restarting".into(),
        };
        assert!(close_is_abnormal(Some(&frame)));
    }

    #[test]
    fn missing_close_frame_is_abnormal() {
        assert!(close_is_abnormal(None));
    }
}
