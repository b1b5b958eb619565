//! Reconnect policy: fixed interval, bounded attempts per disconnect episode.

use std::time::Duration;

/// Controls how the node client reconnects after a connection drop.
///
/// Attempts are budgeted per disconnect episode: the counter resets to zero
/// on a successful connect, never on merely entering the reconnect loop. A
/// node that drops once in a while therefore reconnects indefinitely, while
/// a node that cannot reach the server at all gives up after `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Fixed wait between attempts (no exponential growth).
    pub interval: Duration,
    /// Attempts allowed within one episode before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Whether the episode's budget is spent.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.interval, Duration::from_secs(5));
        assert_eq!(p.max_attempts, 10);
    }

    #[test]
    fn exhausted_at_max() {
        let p = ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 3,
        };
        assert!(!p.exhausted(0));
        assert!(!p.exhausted(2));
        assert!(p.exhausted(3));
        assert!(p.exhausted(4));
    }
}
