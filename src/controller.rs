//! Controller-side management of receiver connections.
//!
//! The [`Controller`] is the main entry point for the library. It discovers
//! receivers, owns one [`Session`] per connection, registers the media
//! callbacks the receiver pulls data through, and forwards remote-control
//! commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::discovery;
use crate::event::SessionEvent;
use crate::ring_buffer::RingBuffer;
use crate::rpc::{
    CallbackHandler, MEDIA_CALLBACKS, MEDIA_READ_CALLBACK, MEDIA_SEEK_CALLBACK,
    MEDIA_STATUS_CALLBACK, MEDIA_STOP_CALLBACK, RpcSession,
};
use crate::session::Session;
use crate::source::StreamSource;
use crate::status::{MAX_VOLUME, PlaybackStatus};
use crate::types::{ConnectionState, Handle, SeekRequest, ServerRecord};
use crate::value::Value;
use crate::{Error, Result};

/// Controller for NymphCast receivers.
///
/// Each connection gets its own [`Session`]; events from all of them arrive
/// on the single channel returned by [`Controller::new`].
///
/// # Example
///
/// ```ignore
/// let (controller, mut events) = Controller::new(transport, ClientConfig::new("Desk"));
/// let servers = controller.discover().await?;
/// let handle = controller.connect_record(&servers[0])?;
/// controller.cast_file(handle, "song.mp3")?;
///
/// while let Some(event) = events.recv().await {
///     if let SessionEvent::Stopped { handle } = event {
///         controller.disconnect_server(handle)?;
///     }
/// }
/// ```
pub struct Controller<R: RpcSession> {
    transport: Arc<R>,
    config: ClientConfig,
    sessions: Mutex<HashMap<Handle, Arc<Session>>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<R: RpcSession> Controller<R> {
    /// Create a controller on top of `transport`.
    ///
    /// Returns the controller and a receiver for all session events.
    pub fn new(transport: Arc<R>, config: ClientConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        (
            Self {
                transport,
                config,
                sessions: Mutex::new(HashMap::new()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Discover receivers using the configured discovery settings.
    pub async fn discover(&self) -> Result<Vec<ServerRecord>> {
        discovery::resolve(&self.config.discovery).await
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect to the receiver at `address` on the configured port.
    pub fn connect_server(&self, address: &str) -> Result<Handle> {
        self.connect_to(address, self.config.port)
    }

    /// Connect to a discovered receiver, preferring its IPv4 address.
    pub fn connect_record(&self, record: &ServerRecord) -> Result<Handle> {
        let address = record.address().ok_or_else(|| {
            Error::Connect(format!("server '{}' has no known address", record.name))
        })?;
        self.connect_to(address, record.port)
    }

    fn connect_to(&self, address: &str, port: u16) -> Result<Handle> {
        let identity = self.config.identity();
        let handle = self
            .transport
            .connect(address, port, &identity)
            .map_err(|e| Error::Connect(format!("{address}:{port}: {e}")))?;
        debug!(%handle, address, port, "Transport connected");

        let transport: Arc<dyn RpcSession> = self.transport.clone();
        let session = Arc::new(Session::new(
            handle,
            self.config.block_size,
            Arc::downgrade(&transport),
            self.event_tx.clone(),
        ));
        self.sessions.lock().insert(handle, Arc::clone(&session));

        let result = self
            .handshake(handle, &identity)
            .and_then(|()| self.register_callbacks(&session));

        if let Err(e) = result {
            warn!(%handle, address, error = %e, "Connect failed");
            self.sessions.lock().remove(&handle);
            session.shutdown();
            if let Err(e) = self.transport.disconnect(handle) {
                debug!(%handle, error = %e, "Disconnect after failed connect");
            }
            return Err(e);
        }

        session.set_state(ConnectionState::Connected);
        info!(%handle, address, port, "Connected to receiver");
        session.emit(SessionEvent::Connected { handle });
        Ok(handle)
    }

    fn handshake(&self, handle: Handle, identity: &str) -> Result<()> {
        let reply = self
            .transport
            .call_method(handle, "connect", vec![Value::from(identity)])
            .map_err(|e| Error::Connect(format!("handshake failed: {e}")))?;
        match reply {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => Err(Error::Connect("receiver refused the client".to_string())),
            other => Err(Error::Connect(format!(
                "handshake returned {}, expected bool",
                other.kind()
            ))),
        }
    }

    /// Register all media callbacks, or none of them.
    fn register_callbacks(&self, session: &Arc<Session>) -> Result<()> {
        let handle = session.handle();
        let handlers = [
            (MEDIA_READ_CALLBACK, handler(session, Session::dispatch_read)),
            (MEDIA_SEEK_CALLBACK, handler(session, Session::dispatch_seek)),
            (MEDIA_STOP_CALLBACK, handler(session, Session::dispatch_stop)),
            (MEDIA_STATUS_CALLBACK, handler(session, Session::dispatch_status)),
        ];

        let mut registered = Vec::with_capacity(handlers.len());
        for (name, callback) in handlers {
            if let Err(e) = self.transport.register_callback(handle, name, callback) {
                for done in registered {
                    self.remove_callback(handle, done);
                }
                return Err(Error::Connect(format!("registering {name} failed: {e}")));
            }
            registered.push(name);
        }
        Ok(())
    }

    fn remove_callback(&self, handle: Handle, name: &str) {
        if let Err(e) = self.transport.remove_callback(handle, name) {
            warn!(%handle, callback = name, error = %e, "Failed to remove callback");
        }
    }

    /// Close the connection behind `handle`.
    ///
    /// Safe from any state, including mid-stream. Unknown handles are ignored.
    pub fn disconnect_server(&self, handle: Handle) -> Result<()> {
        let Some(session) = self.sessions.lock().remove(&handle) else {
            debug!(%handle, "Disconnect of unknown handle ignored");
            return Ok(());
        };

        session.deactivate();
        for name in MEDIA_CALLBACKS {
            self.remove_callback(handle, name);
        }
        let result = self.transport.disconnect(handle);
        session.shutdown();

        info!(%handle, "Disconnected from receiver");
        session.emit(SessionEvent::Disconnected { handle });
        result
    }

    /// Disconnect every open connection.
    pub fn disconnect_all(&self) {
        let handles: Vec<_> = self.sessions.lock().keys().copied().collect();
        for handle in handles {
            if let Err(e) = self.disconnect_server(handle) {
                warn!(%handle, error = %e, "Disconnect failed");
            }
        }
    }

    /// State of the connection behind `handle`.
    pub fn state(&self, handle: Handle) -> ConnectionState {
        self.sessions
            .lock()
            .get(&handle)
            .map(|s| s.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Handles of all open connections.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<_> = self.sessions.lock().keys().copied().collect();
        handles.sort();
        handles
    }

    /// Last status reported by the receiver behind `handle`.
    pub fn last_status(&self, handle: Handle) -> Option<PlaybackStatus> {
        self.sessions.lock().get(&handle).map(|s| s.last_status())
    }

    fn session(&self, handle: Handle) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::Session(format!("{handle} is not connected")))
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// Stream a local file to the receiver.
    ///
    /// The file is opened before anything is sent; if that fails the
    /// receiver never hears about the stream.
    pub fn cast_file(&self, handle: Handle, path: impl AsRef<Path>) -> Result<()> {
        let session = self.idle_session(handle)?;
        let source = StreamSource::open_file(path.as_ref())?;
        let size = source.size().unwrap_or(0);
        let filesize = u32::try_from(size).map_err(|_| {
            Error::StreamIo(format!(
                "{} is {size} bytes, receivers accept at most {}",
                path.as_ref().display(),
                u32::MAX
            ))
        })?;

        debug!(%handle, path = %path.as_ref().display(), filesize, "Casting file");
        self.start_stream(&session, source, filesize)
    }

    /// Stream data pushed into `ring` by the caller.
    ///
    /// The stream length is unknown, so the receiver is told a size of zero.
    pub fn cast_buffer(&self, handle: Handle, ring: Arc<RingBuffer>) -> Result<()> {
        let session = self.idle_session(handle)?;
        debug!(%handle, "Casting push buffer");
        self.start_stream(&session, StreamSource::push(ring), 0)
    }

    /// Ask the receiver to play `url` itself. No data flows through the
    /// controller.
    pub fn cast_url(&self, handle: Handle, url: &str) -> Result<()> {
        let session = self.idle_session(handle)?;
        debug!(%handle, url, "Casting URL");
        self.session_start(handle, Value::from(url))?;
        session.set_state(ConnectionState::SessionActive);
        session.emit(SessionEvent::StreamStarted { handle });
        Ok(())
    }

    /// Release the active stream source and return to `Connected`.
    pub fn end_stream(&self, handle: Handle) -> Result<()> {
        let session = self.session(handle)?;
        session.release_source();
        if session.state() == ConnectionState::SessionActive {
            session.set_state(ConnectionState::Connected);
        }
        Ok(())
    }

    fn idle_session(&self, handle: Handle) -> Result<Arc<Session>> {
        let session = self.session(handle)?;
        match session.state() {
            ConnectionState::Connected if !session.has_source() => Ok(session),
            ConnectionState::Connected | ConnectionState::SessionActive => Err(Error::Session(
                format!("{handle} already has an active stream"),
            )),
            state => Err(Error::Session(format!("{handle} is {state:?}"))),
        }
    }

    fn start_stream(&self, session: &Session, source: StreamSource, filesize: u32) -> Result<()> {
        let handle = session.handle();
        // Installed first: the receiver may start pulling before session_start returns.
        session.open_source(source)?;

        let start = Value::structure([("filesize", Value::U32(filesize))]);
        if let Err(e) = self.session_start(handle, start) {
            session.abandon_source();
            return Err(e);
        }

        session.set_state(ConnectionState::SessionActive);
        info!(%handle, filesize, "Stream started");
        session.emit(SessionEvent::StreamStarted { handle });
        Ok(())
    }

    fn session_start(&self, handle: Handle, descriptor: Value) -> Result<()> {
        let code = self
            .transport
            .call_method(handle, "session_start", vec![descriptor])?
            .as_u8()?;
        if code != 0 {
            return Err(Error::Protocol(format!(
                "receiver rejected stream with code {code}"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Remote control
    // ========================================================================

    fn call(&self, handle: Handle, method: &str, args: Vec<Value>) -> Result<Value> {
        self.session(handle)?;
        debug!(%handle, method, "TX: command");
        self.transport.call_method(handle, method, args)
    }

    fn call_u8(&self, handle: Handle, method: &str, args: Vec<Value>) -> Result<u8> {
        self.call(handle, method, args)?.as_u8()
    }

    pub fn playback_start(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "playback_start", Vec::new())
    }

    pub fn playback_stop(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "playback_stop", Vec::new())
    }

    pub fn playback_pause(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "playback_pause", Vec::new())
    }

    pub fn playback_rewind(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "playback_rewind", Vec::new())
    }

    pub fn playback_forward(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "playback_forward", Vec::new())
    }

    /// Seek the receiver's playback.
    ///
    /// Sent as a two-element array: the seek type (1 = bytes, 2 = percentage)
    /// followed by the value.
    pub fn playback_seek(&self, handle: Handle, request: SeekRequest) -> Result<u8> {
        let value = match request {
            SeekRequest::ByteOffset(offset) => Value::U64(offset),
            SeekRequest::Percentage(pct) if pct <= 100 => Value::U8(pct),
            SeekRequest::Percentage(pct) => {
                return Err(Error::Protocol(format!("seek percentage {pct} above 100")));
            }
        };
        let args = vec![Value::Array(vec![Value::U8(request.seek_type()), value])];
        self.call_u8(handle, "playback_seek", args)
    }

    /// Set the receiver volume (0-128).
    pub fn volume_set(&self, handle: Handle, volume: u8) -> Result<u8> {
        if volume > MAX_VOLUME {
            return Err(Error::Protocol(format!(
                "volume {volume} above {MAX_VOLUME}"
            )));
        }
        self.call_u8(handle, "volume_set", vec![Value::U8(volume)])
    }

    pub fn volume_up(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "volume_up", Vec::new())
    }

    pub fn volume_down(&self, handle: Handle) -> Result<u8> {
        self.call_u8(handle, "volume_down", Vec::new())
    }

    /// Query the receiver's playback status and remember it.
    pub fn playback_status(&self, handle: Handle) -> Result<PlaybackStatus> {
        let reply = self.call(handle, "playback_status", Vec::new())?;
        self.session(handle)?.update_status(&reply)
    }

    /// List the apps installed on the receiver.
    pub fn app_list(&self, handle: Handle) -> Result<String> {
        let reply = self.call(handle, "app_list", Vec::new())?;
        Ok(reply.as_str()?.to_string())
    }

    /// Send `message` to app `app_id` on the receiver and return its reply.
    pub fn app_send(&self, handle: Handle, app_id: &str, message: &str) -> Result<String> {
        let args = vec![Value::from(app_id), Value::from(message)];
        let reply = self.call(handle, "app_send", args)?;
        Ok(reply.as_str()?.to_string())
    }
}

/// Wrap a session dispatch method as a transport callback.
fn handler(session: &Arc<Session>, dispatch: fn(&Session, &[Value])) -> CallbackHandler {
    let session = Arc::clone(session);
    Arc::new(move |args: Vec<Value>| dispatch(&session, &args))
}
