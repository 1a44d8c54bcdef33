//! # NymphCast client
//!
//! Controller side of the NymphCast casting protocol: find receivers on the
//! local network, connect to them over an RPC transport, and stream media
//! that the receiver pulls block by block.
//!
//! ## Quick Start
//!
//! ```ignore
//! use nymphcast::{ClientConfig, Controller, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> nymphcast::Result<()> {
//!     let (controller, mut events) = Controller::new(transport, ClientConfig::new("Desk"));
//!
//!     let servers = controller.discover().await?;
//!     let handle = controller.connect_record(&servers[0])?;
//!     controller.cast_file(handle, "song.mp3")?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SessionEvent::Status { status, .. } => {
//!                 println!("Position: {:.1}s", status.position);
//!             }
//!             SessionEvent::Stopped { handle } => {
//!                 controller.disconnect_server(handle)?;
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod event;
pub mod ring_buffer;
pub mod rpc;
pub mod source;
pub mod status;
pub mod types;
pub mod value;

// Internal modules
pub(crate) mod session;

// Re-export main public API
pub use config::{ClientConfig, DiscoveryConfig};
pub use controller::Controller;
pub use discovery::{resolve, resolve_service};
pub use event::SessionEvent;
pub use ring_buffer::{RingBuffer, RingStats};
pub use rpc::{CallbackHandler, RpcSession};
pub use session::MediaCallbacks;
pub use source::{Block, StreamSource};
pub use status::PlaybackStatus;
pub use value::Value;

pub use error::Error;
pub use types::*;

/// Result type for NymphCast client operations.
pub type Result<T> = std::result::Result<T, Error>;
