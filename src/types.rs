//! Core data types for the NymphCast client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A receiver found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Display name announced by the receiver.
    pub name: String,
    /// IPv4 address, empty if unknown.
    pub ipv4: String,
    /// IPv6 address, empty if unknown.
    pub ipv6: String,
    /// Control/data channel port.
    pub port: u16,
}

impl ServerRecord {
    /// Preferred address to connect to: IPv4 if known, otherwise IPv6.
    pub fn address(&self) -> Option<&str> {
        if !self.ipv4.is_empty() {
            Some(&self.ipv4)
        } else if !self.ipv6.is_empty() {
            Some(&self.ipv6)
        } else {
            None
        }
    }
}

/// Opaque RPC session handle, owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Controller-side state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    SessionActive,
}

/// Seek command issued by the controller through `playback_seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekRequest {
    /// Absolute byte offset into the media.
    ByteOffset(u64),
    /// Percentage of the media duration (0-100).
    Percentage(u8),
}

impl SeekRequest {
    /// Wire code of the seek type.
    pub fn seek_type(&self) -> u8 {
        match self {
            SeekRequest::ByteOffset(_) => 1,
            SeekRequest::Percentage(_) => 2,
        }
    }
}
