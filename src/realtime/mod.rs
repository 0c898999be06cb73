//! Server push channel.
//!
//! - `transport`: the WebSocket connection and its reconnect loop
//! - `router`: per-topic handler registry
//! - `sync`: the handlers that keep the query cache current

mod router;
mod sync;
mod transport;

pub use router::{EventRouter, Unsubscribe};
pub use sync::RealtimeSync;
pub use transport::{
    ConnectionCallback, ConnectionState, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_INTERVAL,
    DEFAULT_WS_PATH, ErrorCallback, TransportError, TransportHandle, TransportOptions, connect,
    connect_with_router, websocket_url,
};
