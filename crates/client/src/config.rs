//! Client configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default socket path, shared with the scheduler listener
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bqs.sock";

/// Items per BIND/UNBIND request
pub const DEFAULT_BIND_PAGE_SIZE: usize = 300;

/// Items per GET_ALL_BIND page
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 450;

/// Connection and paging settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub socket_path: PathBuf,

    pub bind_page_size: usize,

    pub list_page_size: u32,

    /// Attempts while the server is not started (socket missing or refused)
    pub not_started_retries: u32,

    /// Attempts while the connect would block
    pub would_block_retries: u32,

    /// Attempts after connect timeouts
    pub timeout_retries: u32,

    /// Pause between connect attempts
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            bind_page_size: DEFAULT_BIND_PAGE_SIZE,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            not_started_retries: 300,
            would_block_retries: 300,
            timeout_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl ClientConfig {
    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }
}
