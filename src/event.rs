//! Session events delivered to the controller's caller.
//!
//! Callback handlers run on the transport's thread; they report what happened
//! through a bounded channel instead of touching caller state directly.

use crate::status::PlaybackStatus;
use crate::types::Handle;

/// Events from a receiver connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed and callbacks are registered.
    Connected { handle: Handle },

    /// Connection closed by `disconnect_server`.
    Disconnected { handle: Handle },

    /// The receiver accepted a new stream.
    StreamStarted { handle: Handle },

    /// A block was delivered in answer to a read or seek request.
    BlockSent {
        handle: Handle,
        bytes: usize,
        eof: bool,
    },

    /// The receiver ended playback. The stream source stays open until
    /// `end_stream` or `disconnect_server`.
    Stopped { handle: Handle },

    /// The receiver reported its playback status.
    Status {
        handle: Handle,
        status: PlaybackStatus,
    },

    /// A seek request could not be honoured; the stream position is unchanged.
    SeekFailed {
        handle: Handle,
        position: u64,
        reason: String,
    },

    /// The stream was torn down after a failure. The connection stays up, so
    /// a new cast can start without reconnecting.
    SessionEnded { handle: Handle, reason: String },
}

impl SessionEvent {
    /// Connection the event belongs to.
    pub fn handle(&self) -> Handle {
        match self {
            SessionEvent::Connected { handle }
            | SessionEvent::Disconnected { handle }
            | SessionEvent::StreamStarted { handle }
            | SessionEvent::BlockSent { handle, .. }
            | SessionEvent::Stopped { handle }
            | SessionEvent::Status { handle, .. }
            | SessionEvent::SeekFailed { handle, .. }
            | SessionEvent::SessionEnded { handle, .. } => *handle,
        }
    }
}
