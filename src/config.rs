// src/config.rs
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 19876;

/// Where the block store lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host name or address, resolved at connect time.
    pub host: String,
    pub port: u16,
    /// None blocks until the OS gives up.
    pub connect_timeout: Option<Duration>,
    /// Read/write deadline on the socket. None blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: None,
            io_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_builders() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint(), "127.0.0.1:19876");
        assert!(config.io_timeout.is_none());

        let config = ClientConfig::new()
            .with_host("store.local")
            .with_port(4000)
            .with_io_timeout(Duration::from_millis(250));
        assert_eq!(config.endpoint(), "store.local:4000");
        assert_eq!(config.io_timeout, Some(Duration::from_millis(250)));
        assert!(config.connect_timeout.is_none());
    }
}
