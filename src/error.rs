// Error types for the device router

use std::net::SocketAddrV4;

use thiserror::Error;

/// Main error type for the routing core
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Failed to parse route table: {0}")]
    RouteTableParse(String),

    #[error("Route table contains no usable routes")]
    NoUsableRoutes,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to resolve host: {0}")]
    Resolve(String),

    #[error("Failed to bind socket to device {device}: {reason}")]
    BindDevice { device: String, reason: String },

    #[error("Connect to {addr} on dev {device} timed out")]
    ConnectTimeout { device: String, addr: SocketAddrV4 },

    #[error("Dial attempt cancelled")]
    Cancelled,

    #[error("No candidate devices to dial {0}")]
    NoCandidates(SocketAddrV4),

    #[error("All {attempts} candidate device(s) failed to reach {addr}")]
    AllCandidatesFailed { addr: SocketAddrV4, attempts: usize },

    #[error("Failed to determine original destination: {0}")]
    OriginalDestination(String),

    #[error("Original destination {0} is the proxy itself")]
    SelfDestination(SocketAddrV4),
}

/// Result type alias using RouterError
pub type RouterResult<T> = Result<T, RouterError>;

impl RouterError {
    /// Per-attempt failures that another device or a later dial may get past
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::Io(_) | RouterError::BindDevice { .. } | RouterError::ConnectTimeout { .. }
        )
    }
}
