//! Platform-agnostic core logic for the bus WebSocket client.
//!
//! Free of any runtime dependency: the bus connection owns timers and sockets
//! and calls into this module for the backoff math and URL checks.

use std::time::Duration;

use url::Url;

use crate::ports::outbound::TransportError;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Exponential backoff for reconnect attempts.
///
/// Attempt numbers start at 1. The delay before attempt `n` is
/// `base_delay * 2^(n-1)`; attempts beyond `max_attempts` are not made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before performing `attempt`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match 2u32.checked_pow(attempt.saturating_sub(1)) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None => Duration::MAX,
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Every delay the policy will ever produce, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.next_delay(attempt))
    }
}

/// Check that `raw` is a usable rosbridge endpoint (`ws://` or `wss://`).
pub fn validate_bus_url(raw: &str) -> Result<Url, TransportError> {
    let url = Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_from_base() {
        let policy = ReconnectPolicy::new(Duration::from_millis(2_000), 5);

        for attempt in 1..=5 {
            assert_eq!(
                policy.next_delay(attempt),
                Duration::from_millis(2_000 * 2u64.pow(attempt - 1))
            );
        }
    }

    #[test]
    fn default_schedule_matches_console_behaviour() {
        let delays: Vec<u64> = ReconnectPolicy::default()
            .delays()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 32_000]);
    }

    #[test]
    fn retry_stops_after_max_attempts() {
        let policy = ReconnectPolicy::new(Duration::from_millis(500), 3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), u32::MAX);
        assert_eq!(policy.next_delay(64), Duration::MAX);
    }

    #[test]
    fn only_websocket_schemes_are_accepted() {
        assert!(validate_bus_url("ws://10.0.0.5:9090").is_ok());
        assert!(validate_bus_url("wss://robot.example/bridge").is_ok());
        assert!(matches!(
            validate_bus_url("http://localhost:9090"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_bus_url("localhost:9090"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }
}
