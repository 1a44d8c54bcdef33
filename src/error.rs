//! Error types for the NymphCast client core.

use thiserror::Error;

/// Main error type for NymphCast client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup, send or receive failed during discovery.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// A discovery response was malformed.
    #[error("malformed discovery response: {0}")]
    Parse(String),

    /// Connection or handshake with a receiver failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// Opening, reading or seeking the stream source failed.
    #[error("stream I/O error: {0}")]
    StreamIo(String),

    /// Receiver returned an unexpected value or omitted a required field.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The RPC transport failed to deliver a call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation not valid in the current session state.
    #[error("session error: {0}")]
    Session(String),

    /// Ring buffer has no free slot.
    #[error("ring buffer full")]
    BufferFull,

    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
