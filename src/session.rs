//! Per-connection session state and the receiver-driven media callbacks.
//!
//! A [`Session`] owns at most one [`StreamSource`] and is handed explicitly to
//! every callback handler registered for its connection. Handlers may run on
//! the transport's thread while the controller tears the session down, so
//! every handler checks the liveness flag under the source lock before
//! touching the source.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::event::SessionEvent;
use crate::rpc::RpcSession;
use crate::source::{Block, StreamSource};
use crate::status::PlaybackStatus;
use crate::types::{ConnectionState, Handle};
use crate::value::Value;
use crate::{Error, Result};

/// Largest block served for one read request, whatever the receiver's hint.
pub(crate) const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Receiver-driven operations on a session's stream.
///
/// The transport reaches these through the handlers registered on connect.
pub trait MediaCallbacks: Send + Sync {
    /// Produce the next block. `size_hint_kb` overrides the default block size.
    fn on_read_requested(&self, size_hint_kb: Option<u32>) -> Result<Block>;

    /// Reposition the stream to byte offset `position`.
    fn on_seek_requested(&self, position: u64) -> Result<()>;

    /// Remote playback ended.
    fn on_stop(&self);

    /// Apply a status update from the receiver.
    fn on_status(&self, update: &Value) -> Result<PlaybackStatus>;
}

pub(crate) struct Session {
    handle: Handle,
    live: AtomicBool,
    state: Mutex<ConnectionState>,
    source: Mutex<Option<StreamSource>>,
    status: Mutex<PlaybackStatus>,
    block_size: usize,
    transport: Weak<dyn RpcSession>,
    events: mpsc::Sender<SessionEvent>,
}

impl Session {
    pub(crate) fn new(
        handle: Handle,
        block_size: usize,
        transport: Weak<dyn RpcSession>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            handle,
            live: AtomicBool::new(true),
            state: Mutex::new(ConnectionState::Connecting),
            source: Mutex::new(None),
            status: Mutex::new(PlaybackStatus::default()),
            block_size,
            transport,
            events,
        }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(handle = %self.handle, from = ?*current, to = ?state, "Session state");
            *current = state;
        }
    }

    pub(crate) fn last_status(&self) -> PlaybackStatus {
        *self.status.lock()
    }

    pub(crate) fn update_status(&self, payload: &Value) -> Result<PlaybackStatus> {
        let mut status = self.status.lock();
        let result = status.update_from(payload);
        result.map(|()| *status)
    }

    pub(crate) fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Install the session's stream source. At most one may be active.
    pub(crate) fn open_source(&self, source: StreamSource) -> Result<()> {
        let mut slot = self.source.lock();
        if slot.is_some() {
            return Err(Error::Session(format!(
                "{} already has an active stream",
                self.handle
            )));
        }
        *slot = Some(source);
        Ok(())
    }

    /// Drop the stream source, if any. Returns whether one was open.
    pub(crate) fn release_source(&self) -> bool {
        let released = self.source.lock().take().is_some();
        if released {
            debug!(handle = %self.handle, "Stream source released");
        }
        released
    }

    /// Stop serving callbacks. Handlers arriving later do nothing.
    pub(crate) fn deactivate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Drop a source installed for a stream the receiver refused.
    pub(crate) fn abandon_source(&self) {
        if let Some(source) = self.source.lock().take() {
            debug!(handle = %self.handle, "Stream source abandoned");
            source.abandon();
        }
    }

    /// Mark the session dead and release its source.
    ///
    /// Handlers already running finish their current source access first;
    /// later ones see the cleared flag and do nothing.
    pub(crate) fn shutdown(&self) {
        self.deactivate();
        self.release_source();
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(handle = %self.handle, error = %e, "Dropping session event");
        }
    }

    // --- Callback dispatch (transport thread) ---

    pub(crate) fn dispatch_read(&self, args: &[Value]) {
        if !self.is_live() {
            trace!(handle = %self.handle, "Read request after teardown ignored");
            return;
        }
        let hint = args
            .first()
            .and_then(|v| v.as_u64().ok())
            .and_then(|kb| u32::try_from(kb).ok());

        match self.on_read_requested(hint) {
            Ok(block) => self.deliver(block),
            Err(e) => self.read_failed(e),
        }
    }

    pub(crate) fn dispatch_seek(&self, args: &[Value]) {
        if !self.is_live() {
            trace!(handle = %self.handle, "Seek request after teardown ignored");
            return;
        }
        let position = match args.first().map(Value::as_u64) {
            Some(Ok(position)) => position,
            Some(Err(e)) => {
                warn!(handle = %self.handle, error = %e, "Malformed seek request");
                return;
            }
            None => {
                warn!(handle = %self.handle, "Seek request without position");
                return;
            }
        };

        match self.on_seek_requested(position) {
            Ok(()) => match self.on_read_requested(None) {
                Ok(block) => self.deliver(block),
                Err(e) => self.read_failed(e),
            },
            Err(e) => {
                warn!(handle = %self.handle, position, error = %e, "Seek failed");
                self.emit(SessionEvent::SeekFailed {
                    handle: self.handle,
                    position,
                    reason: e.to_string(),
                });
            }
        }
    }

    pub(crate) fn dispatch_stop(&self, _args: &[Value]) {
        if self.is_live() {
            self.on_stop();
        }
    }

    pub(crate) fn dispatch_status(&self, args: &[Value]) {
        if !self.is_live() {
            return;
        }
        let Some(payload) = args.first() else {
            warn!(handle = %self.handle, "Status callback without payload");
            return;
        };
        if let Err(e) = self.on_status(payload) {
            warn!(handle = %self.handle, error = %e, "Invalid status update");
        }
    }

    /// Send a block to the receiver via `session_data`.
    ///
    /// A failed delivery ends the stream and is reported to the caller; it
    /// never takes the process down.
    fn deliver(&self, block: Block) {
        let Some(transport) = self.transport.upgrade() else {
            debug!(handle = %self.handle, "Transport gone, dropping block");
            return;
        };
        let bytes = block.data.len();
        let eof = block.eof;

        let ack = transport
            .call_method(
                self.handle,
                "session_data",
                vec![Value::Blob(block.data), Value::Bool(eof)],
            )
            .and_then(|v| v.as_u8());

        match ack {
            Ok(code) => {
                trace!(handle = %self.handle, bytes, eof, code, "TX: session_data");
                self.emit(SessionEvent::BlockSent {
                    handle: self.handle,
                    bytes,
                    eof,
                });
            }
            Err(e) => self.terminate(format!("session_data failed: {e}")),
        }
    }

    fn read_failed(&self, error: Error) {
        match error {
            Error::Session(reason) => {
                debug!(handle = %self.handle, %reason, "Read request ignored");
            }
            other => self.terminate(other.to_string()),
        }
    }

    /// End the stream after a failure; the connection itself stays up.
    fn terminate(&self, reason: String) {
        if !self.is_live() {
            return;
        }
        warn!(handle = %self.handle, %reason, "Ending stream");
        self.release_source();
        self.set_state(ConnectionState::Connected);
        self.emit(SessionEvent::SessionEnded {
            handle: self.handle,
            reason,
        });
    }
}

impl MediaCallbacks for Session {
    fn on_read_requested(&self, size_hint_kb: Option<u32>) -> Result<Block> {
        let len = match size_hint_kb {
            Some(kb) if kb > 0 => (kb as usize).saturating_mul(1024).min(MAX_BLOCK_SIZE),
            _ => self.block_size,
        };

        let mut source = self.source.lock();
        if !self.is_live() {
            return Err(Error::Session("session torn down".to_string()));
        }
        let source = source
            .as_mut()
            .ok_or_else(|| Error::Session("no active stream".to_string()))?;
        source.read_block(len)
    }

    fn on_seek_requested(&self, position: u64) -> Result<()> {
        let mut source = self.source.lock();
        if !self.is_live() {
            return Err(Error::Session("session torn down".to_string()));
        }
        let source = source
            .as_mut()
            .ok_or_else(|| Error::Session("no active stream".to_string()))?;
        source.seek(position)?;
        debug!(handle = %self.handle, position, "Stream repositioned");
        Ok(())
    }

    fn on_stop(&self) {
        info!(handle = %self.handle, "Remote playback stopped");
        self.emit(SessionEvent::Stopped {
            handle: self.handle,
        });
    }

    fn on_status(&self, update: &Value) -> Result<PlaybackStatus> {
        let result = self.update_status(update);
        // A rejected update still reaches the caller, flagged as an error.
        let status = self.last_status();
        self.emit(SessionEvent::Status {
            handle: self.handle,
            status,
        });
        result
    }
}
