// Error types for WireGuard Tunnel Manager

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid tunnel name: {0}")]
    InvalidTunnelName(String),

    #[error("Tunnel not found: {0}")]
    TunnelNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, Error>;
