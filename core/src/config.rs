// Messenger configuration
//
// Defaults can be overridden from the environment.

use std::time::Duration;

/// Default timeout applied by `ReqRespChannel::request`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Messenger-wide settings for conversations and request/response channels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessengerConfig {
    pub request_timeout: Duration,
    /// Appended to a conversation name to form its request channel
    pub outgoing_suffix: String,
    /// Appended to a conversation name to form its reply channel
    pub reply_suffix: String,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            outgoing_suffix: "-o".to_string(),
            reply_suffix: "-r".to_string(),
        }
    }
}

impl MessengerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            request_timeout: std::env::var("COURIER_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default.request_timeout),
            outgoing_suffix: std::env::var("COURIER_OUTGOING_SUFFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.outgoing_suffix),
            reply_suffix: std::env::var("COURIER_REPLY_SUFFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.reply_suffix),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn outgoing_channel_name(&self, conversation: &str) -> String {
        format!("{conversation}{}", self.outgoing_suffix)
    }

    pub fn reply_channel_name(&self, conversation: &str) -> String {
        format!("{conversation}{}", self.reply_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MessengerConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.outgoing_channel_name("users"), "users-o");
        assert_eq!(config.reply_channel_name("users"), "users-r");
    }

    #[test]
    fn test_with_request_timeout() {
        let config = MessengerConfig::default().with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.reply_suffix, "-r");
    }
}
