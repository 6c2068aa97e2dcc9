//! Socket front end and client settings

use std::time::Duration;

use serde::Deserialize;

/// Default socket path for the scheduler front end
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bqs.sock";

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve client frames on a Unix socket
    /// Default: true
    pub enabled: bool,

    /// Default: /tmp/bqs.sock
    pub socket_path: String,

    /// Concurrent client connections
    /// Default: 64
    pub max_connections: usize,

    /// Per-connection read buffer (bytes)
    /// Default: 65536
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: DEFAULT_SOCKET_PATH.into(),
            max_connections: 64,
            read_buffer_size: 64 * 1024,
        }
    }
}

/// `[client]` section
///
/// # Example
///
/// ```toml
/// [client]
/// bind_page_size = 300
/// list_page_size = 450
/// timeout_retries = 3
/// retry_delay = "10ms"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Socket to connect to; empty means `[server] socket_path`
    pub socket_path: String,

    /// Items per BIND/UNBIND request
    /// Default: 300
    pub bind_page_size: usize,

    /// Items per GET_ALL_BIND page
    /// Default: 450
    pub list_page_size: u32,

    /// Default: 300
    pub not_started_retries: u32,

    /// Default: 300
    pub would_block_retries: u32,

    /// Default: 3
    pub timeout_retries: u32,

    /// Default: 10ms
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            bind_page_size: 300,
            list_page_size: 450,
            not_started_retries: 300,
            would_block_retries: 300,
            timeout_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}
