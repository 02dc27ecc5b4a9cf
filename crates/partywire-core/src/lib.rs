//! # partywire-core
//!
//! Transport-independent building blocks shared by the partywire server and
//! client:
//!
//! - [`schema`]: the validator capability, the built-in schema engine and
//!   validation issues
//! - [`message`]: the envelope and the `ws.error` / `fetch.error` shapes
//! - [`codec`]: frame decoding with empty-value detection, and encoding
//! - [`logging`]: subscriber setup and test log capture

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;
pub mod message;
pub mod schema;

pub use codec::Frame;
pub use errors::{CodecError, SchemaError};
pub use message::{Envelope, ErrorReason, ErrorResponse, FetchError};
pub use schema::{Field, Issues, PathSegment, Schema, SerdeSchema, ValidationIssue, Validator};
