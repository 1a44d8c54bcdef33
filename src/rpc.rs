//! Contract of the remote-procedure-call transport.
//!
//! Connection setup, message framing and method dispatch live in the
//! transport; the controller only relies on the [`RpcSession`] trait.
//! Callbacks are registered per session handle, so the transport keeps a
//! reference to each session's handlers instead of dispatching to global
//! functions.

use std::sync::Arc;

use crate::types::Handle;
use crate::value::Value;
use crate::Result;

/// Receiver asks for the next block of data.
pub const MEDIA_READ_CALLBACK: &str = "MediaReadCallback";
/// Receiver asks to reposition the stream, then wants the next block.
pub const MEDIA_SEEK_CALLBACK: &str = "MediaSeekCallback";
/// Receiver finished or aborted playback.
pub const MEDIA_STOP_CALLBACK: &str = "MediaStopCallback";
/// Receiver reports playback status.
pub const MEDIA_STATUS_CALLBACK: &str = "MediaStatusCallback";

/// Every callback a controller registers on connect.
pub const MEDIA_CALLBACKS: [&str; 4] = [
    MEDIA_READ_CALLBACK,
    MEDIA_SEEK_CALLBACK,
    MEDIA_STOP_CALLBACK,
    MEDIA_STATUS_CALLBACK,
];

/// Handler invoked by the transport with the callback's arguments.
///
/// May run on a transport-owned thread, concurrently with controller calls.
pub type CallbackHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Remote-procedure-call transport used by the controller.
pub trait RpcSession: Send + Sync + 'static {
    /// Open a connection and return its handle.
    fn connect(&self, address: &str, port: u16, identity: &str) -> Result<Handle>;

    /// Close the connection behind `handle`.
    fn disconnect(&self, handle: Handle) -> Result<()>;

    /// Invoke a remote method and wait for its result.
    fn call_method(&self, handle: Handle, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Register `handler` for callback `name` on `handle`.
    fn register_callback(&self, handle: Handle, name: &str, handler: CallbackHandler)
    -> Result<()>;

    /// Remove the handler for callback `name` on `handle`.
    fn remove_callback(&self, handle: Handle, name: &str) -> Result<()>;
}

/// In-memory transport for exercising the controller.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::Error;

    #[derive(Debug, Clone)]
    pub(crate) struct Call {
        pub handle: Handle,
        pub method: String,
        pub args: Vec<Value>,
    }

    #[derive(Default)]
    pub(crate) struct MockRpc {
        next_handle: AtomicU32,
        connected: Mutex<HashSet<Handle>>,
        callbacks: Mutex<HashMap<(Handle, String), CallbackHandler>>,
        calls: Mutex<Vec<Call>>,
        responses: Mutex<HashMap<String, Value>>,
        failing: Mutex<HashSet<String>>,
        refuse_connect: AtomicBool,
        refuse_callback: Mutex<Option<String>>,
    }

    impl MockRpc {
        /// Make `method` return `value`.
        pub fn respond(&self, method: &str, value: Value) {
            self.responses.lock().insert(method.to_string(), value);
        }

        /// Make `method` fail at the transport level.
        pub fn fail(&self, method: &str) {
            self.failing.lock().insert(method.to_string());
        }

        pub fn refuse_connect(&self) {
            self.refuse_connect.store(true, Ordering::SeqCst);
        }

        /// Make registration of callback `name` fail.
        pub fn refuse_callback(&self, name: &str) {
            *self.refuse_callback.lock() = Some(name.to_string());
        }

        pub fn calls(&self, method: &str) -> Vec<Call> {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.method == method)
                .cloned()
                .collect()
        }

        pub fn is_connected(&self, handle: Handle) -> bool {
            self.connected.lock().contains(&handle)
        }

        pub fn callback_count(&self, handle: Handle) -> usize {
            self.callbacks
                .lock()
                .keys()
                .filter(|(h, _)| *h == handle)
                .count()
        }

        pub fn handler(&self, handle: Handle, name: &str) -> Option<CallbackHandler> {
            self.callbacks
                .lock()
                .get(&(handle, name.to_string()))
                .cloned()
        }

        /// Deliver a callback the way the receiver would. Returns `false` if
        /// no handler is registered.
        pub fn invoke(&self, handle: Handle, name: &str, args: Vec<Value>) -> bool {
            match self.handler(handle, name) {
                Some(handler) => {
                    handler(args);
                    true
                }
                None => false,
            }
        }

        fn default_response(method: &str) -> Value {
            match method {
                "connect" => Value::Bool(true),
                "app_list" | "app_send" => Value::String(String::new()),
                "playback_status" => Value::structure([("playing", Value::Bool(false))]),
                _ => Value::U8(0),
            }
        }
    }

    impl RpcSession for MockRpc {
        fn connect(&self, _address: &str, _port: u16, _identity: &str) -> Result<Handle> {
            if self.refuse_connect.load(Ordering::SeqCst) {
                return Err(Error::Transport("connection refused".to_string()));
            }
            let handle = Handle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
            self.connected.lock().insert(handle);
            Ok(handle)
        }

        fn disconnect(&self, handle: Handle) -> Result<()> {
            self.connected.lock().remove(&handle);
            Ok(())
        }

        fn call_method(&self, handle: Handle, method: &str, args: Vec<Value>) -> Result<Value> {
            // Held while recording, so no call lands after `disconnect` returns.
            let connected = self.connected.lock();
            if !connected.contains(&handle) {
                return Err(Error::Transport(format!("{handle} not connected")));
            }
            self.calls.lock().push(Call {
                handle,
                method: method.to_string(),
                args,
            });
            drop(connected);
            if self.failing.lock().contains(method) {
                return Err(Error::Transport(format!("{method} failed")));
            }
            Ok(self
                .responses
                .lock()
                .get(method)
                .cloned()
                .unwrap_or_else(|| Self::default_response(method)))
        }

        fn register_callback(
            &self,
            handle: Handle,
            name: &str,
            handler: CallbackHandler,
        ) -> Result<()> {
            if self.refuse_callback.lock().as_deref() == Some(name) {
                return Err(Error::Transport(format!("cannot register {name}")));
            }
            self.callbacks
                .lock()
                .insert((handle, name.to_string()), handler);
            Ok(())
        }

        fn remove_callback(&self, handle: Handle, name: &str) -> Result<()> {
            self.callbacks.lock().remove(&(handle, name.to_string()));
            Ok(())
        }
    }
}
