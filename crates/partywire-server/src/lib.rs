//! # partywire-server
//!
//! Typed realtime rooms over WebSocket plus schema-checked HTTP endpoints.
//!
//! - [`events`]: the event registry, one schema and handler per tag
//! - [`router`]: per-frame validation and dispatch with `ws.error` replies
//! - [`channel`]: send to one connection or broadcast to a room
//! - [`http`]: method + path routing with body, query and header validation
//! - [`lobby`]: rooms and per-room contexts
//! - [`server`]: the axum server tying it together

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod connection;
pub mod errors;
pub mod events;
pub mod health;
pub mod http;
pub mod lobby;
pub mod metrics;
pub mod room;
pub mod router;
pub mod server;
mod session;
pub mod shutdown;

pub use channel::{ResponseChannel, broadcast, send};
pub use config::ServerConfig;
pub use connection::Connection;
pub use errors::{ConfigError, RegistryError, RouteError, ServerError};
pub use events::{EventHandler, EventRegistry, EventRegistryBuilder};
pub use http::{
    Endpoint, EndpointRouter, ExecutionContext, FetchBody, FetchHandler, FetchRequest,
    FetchResponse, Method,
};
pub use lobby::{ContextScope, Lobby};
pub use room::Room;
pub use router::{EventRouter, Outcome};
pub use server::PartyServer;
pub use shutdown::ShutdownCoordinator;
