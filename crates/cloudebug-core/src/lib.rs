//! Cloudebug Core Library
//!
//! Client side of the Cloudebug remote debugger: a WebSocket session to the
//! debug server, an authoritative cache of breakpoints and hits, and a lazily
//! materialized tree for presenting them. Independent of any editor or UI.
//!
//! # Modules
//!
//! - [`session`] - Connection lifecycle, inbound dispatch, reply correlation
//! - [`cache`] - Authoritative breakpoint and hit store
//! - [`tree`] - Lazy presentation model and rendering contract
//! - [`client`] - Wiring and host command flows
//! - [`protocol`] - Wire messages and commands
//! - [`transport`] - WebSocket endpoint and handshake
//! - [`events`] - Event sink trait for decoupling from UI frameworks
//! - [`bus`] - Synchronous publish/subscribe
//! - [`config`] - Client configuration
//! - [`model`] - Breakpoint and hit types
//! - [`error`] - Error types

pub mod bus;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod tree;

// Re-export commonly used types
pub use cache::{BreakpointCache, CacheEvent};
pub use client::{DebugClient, GutterMarker, Toggled};
pub use config::{ClientConfig, SessionConfig};
pub use error::{ClientError, Result};
pub use events::{EventPump, EventSink, NoOpEventSink, StdoutEventSink};
pub use model::{Breakpoint, BreakpointId, ExpressionValue, Hit, HitId};
pub use protocol::{BreakpointRequest, Command, ServerMessage};
pub use session::{EventKind, Session, SessionEvent, SessionState};
pub use transport::{Endpoint, TransportError};
pub use tree::{BreakpointTree, ExpandOutcome, TreeChange, TreeItem, TreeNode};
