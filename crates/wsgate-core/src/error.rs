//! Error types for wsgate.

use std::io;

use thiserror::Error;

/// Main error type for wsgate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Protocol violations on a single connection.
///
/// Any of these closes the offending connection; none of them is
/// recoverable by the peer retrying the same frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame exceeds maximum size: {size} > {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Binary frames are not supported")]
    BinaryFrame,

    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, Error>;
