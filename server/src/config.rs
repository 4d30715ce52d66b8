use shared::{DEFAULT_PORT, IDLE_TIMEOUT_MS, MAX_SESSIONS};
use std::time::Duration;

/// Runtime settings for a relay server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Silence after which a session is evicted
    pub idle_timeout: Duration,
    /// Pause between loop iterations
    pub tick: Duration,
    /// Payloads queued per session before sends start failing
    pub outbound_queue: usize,
    /// Longest a single write may wait on a peer before its connection is dropped
    pub write_timeout: Duration,
    /// Inbound messages handled per tick; the rest wait for the next one
    pub max_messages_per_tick: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_sessions: MAX_SESSIONS,
            idle_timeout: Duration::from_millis(IDLE_TIMEOUT_MS),
            tick: Duration::from_millis(1),
            outbound_queue: 64,
            write_timeout: Duration::from_secs(10),
            max_messages_per_tick: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1234);
        assert_eq!(config.max_sessions, 30);
        assert_eq!(config.idle_timeout, Duration::from_millis(100_000));
        assert_eq!(config.address(), "0.0.0.0:1234");
    }
}
