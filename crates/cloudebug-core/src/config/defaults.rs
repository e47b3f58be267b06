/// Default server address (the debug server's listen address)
pub const DEFAULT_ADDRESS: &str = "localhost:19287";

/// Default WebSocket handshake timeout (milliseconds)
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 3000;

/// Default wait for a superseded connection to close (milliseconds)
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;

/// Default capacity of the async event channels
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
