//! # partywire-client
//!
//! Client side of partywire:
//!
//! - [`dispatcher`]: typed listeners keyed by message type, plus socket
//!   lifecycle listeners
//! - [`socket`]: a tokio-tungstenite connection driving a dispatcher
//! - [`api`]: an HTTP client for declared endpoints

#![deny(unsafe_code)]

pub mod api;
pub mod dispatcher;
pub mod errors;
pub mod socket;

pub use api::{ApiClient, ApiRoute, RequestParams};
pub use dispatcher::{
    ClientOptions, DebugMode, Listener, PartyClient, SocketEvent, SocketListener, SocketSignal,
    Subscription,
};
pub use errors::{ApiError, ClientError};
pub use socket::PartySocket;
