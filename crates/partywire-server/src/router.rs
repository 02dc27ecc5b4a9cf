//! Server event router.
//!
//! Per inbound frame, exactly one of two things happens: the matching
//! handler runs, or one `ws.error` goes back to the sender.
//!
//! 1. decode (`empty message` when undecodable or empty)
//! 2. discriminant check against `{ type: enum(tags) }` (`invalid message`)
//! 3. route lookup (`no matching route`, unreachable after step 2)
//! 4. full validation against the event schema (`invalid message`)
//! 5. dispatch; a handler error or panic becomes `unexpected error`

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metrics::{counter, histogram};
use partywire_core::codec::{self, Frame};
use partywire_core::schema::{Issues, Validator};
use partywire_core::{Envelope, ErrorReason, ErrorResponse};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::channel;
use crate::connection::Connection;
use crate::events::EventRegistry;
use crate::metrics::{WS_HANDLER_DURATION_SECONDS, WS_MESSAGE_ERRORS_TOTAL, WS_MESSAGES_TOTAL};
use crate::room::Room;

/// What happened to one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran to completion.
    Dispatched,
    /// An error response with this reason was sent to the sender.
    Rejected(ErrorReason),
}

/// Validates and dispatches inbound socket messages.
pub struct EventRouter<C> {
    registry: Arc<EventRegistry<C>>,
    serialize_room_dispatch: bool,
}

impl<C: Send + Sync + 'static> EventRouter<C> {
    /// Router over `registry`.
    pub fn new(registry: EventRegistry<C>) -> Self {
        Self {
            registry: Arc::new(registry),
            serialize_room_dispatch: false,
        }
    }

    /// Run messages of one room one at a time, across connections.
    #[must_use]
    pub fn with_room_serialization(mut self, enabled: bool) -> Self {
        self.serialize_room_dispatch = enabled;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &EventRegistry<C> {
        &self.registry
    }

    /// Route one inbound frame. Never fails; rejections are reported to
    /// `connection` and returned as [`Outcome::Rejected`].
    #[instrument(skip_all, fields(conn_id = connection.id(), room_id = room.id()))]
    pub async fn on_message(
        &self,
        frame: &Frame,
        connection: &Arc<Connection>,
        room: &Arc<Room>,
        ctx: &Arc<C>,
    ) -> Outcome {
        counter!(WS_MESSAGES_TOTAL).increment(1);
        let _guard = if self.serialize_room_dispatch {
            Some(room.lock_dispatch().await)
        } else {
            None
        };

        let outcome = self.route(frame, connection, room, ctx).await;
        if let Outcome::Rejected(reason) = outcome {
            counter!(WS_MESSAGE_ERRORS_TOTAL, "reason" => reason.as_str()).increment(1);
        }
        outcome
    }

    async fn route(
        &self,
        frame: &Frame,
        connection: &Arc<Connection>,
        room: &Arc<Room>,
        ctx: &Arc<C>,
    ) -> Outcome {
        let Some(value) = codec::decode(frame) else {
            debug!("undecodable or empty message");
            return reject(connection, ErrorResponse::empty_message());
        };

        if let Err(issues) = self.registry.discriminant().validate(&value) {
            debug!(issues = issues.len(), "unknown or missing message type");
            return reject(connection, ErrorResponse::invalid_message(Issues::new(issues)));
        }

        let Some(definition) = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(|tag| self.registry.get(tag))
        else {
            return reject(connection, ErrorResponse::no_matching_route());
        };
        let message_type = definition.tag();

        if let Err(issues) = definition.schema().validate(&value) {
            debug!(message_type, issues = issues.len(), "message failed validation");
            return reject(connection, ErrorResponse::invalid_message(Issues::new(issues)));
        }

        let Ok(envelope) = Envelope::try_from(value) else {
            return reject(connection, ErrorResponse::no_matching_route());
        };

        debug!(message_type, "dispatching");
        let start = Instant::now();
        let result = AssertUnwindSafe(definition.handler().handle(envelope, connection, room, ctx))
            .catch_unwind()
            .await;
        histogram!(WS_HANDLER_DURATION_SECONDS, "message_type" => message_type.to_owned())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(())) => Outcome::Dispatched,
            Ok(Err(e)) => {
                debug!(message_type, error = %e, "handler failed");
                reject(connection, ErrorResponse::unexpected_error())
            }
            Err(_) => {
                debug!(message_type, "handler panicked");
                reject(connection, ErrorResponse::unexpected_error())
            }
        }
    }
}

fn reject(connection: &Connection, response: ErrorResponse) -> Outcome {
    let reason = response.reason;
    let _ = channel::send(connection, &response);
    Outcome::Rejected(reason)
}
