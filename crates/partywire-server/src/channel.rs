//! Outbound responses: unicast to a connection or fan-out to a room.
//!
//! Messages are serialized once. A serialization failure is logged and
//! nothing is sent.

use std::marker::PhantomData;
use std::sync::Arc;

use partywire_core::codec;
use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::room::Room;

/// Serialize `message` and enqueue it to one connection.
///
/// Returns whether the payload was enqueued.
pub fn send<T: Serialize + ?Sized>(connection: &Connection, message: &T) -> bool {
    match codec::encode(message) {
        Ok(text) => {
            let sent = connection.send_raw(Arc::from(text));
            if !sent {
                debug!(conn_id = connection.id(), "outbound queue full or closed, dropped");
            }
            sent
        }
        Err(e) => {
            warn!(conn_id = connection.id(), error = %e, "failed to serialize response");
            false
        }
    }
}

/// Serialize `message` once and enqueue it to every member of `room` whose
/// id is not in `exclude`. Returns the recipient count.
pub fn broadcast<T: Serialize + ?Sized>(room: &Room, message: &T, exclude: &[&str]) -> usize {
    let text = match codec::encode(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(room_id = room.id(), error = %e, "failed to serialize broadcast");
            return 0;
        }
    };
    let payload: Arc<str> = Arc::from(text);
    let recipients = room.broadcast_raw(&payload, exclude);
    debug!(room_id = room.id(), recipients, excluded = exclude.len(), "broadcast");
    recipients
}

/// Response surface pinned to one response type `R`.
pub struct ResponseChannel<R> {
    _marker: PhantomData<fn(R)>,
}

impl<R: Serialize> ResponseChannel<R> {
    /// New channel for `R`.
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    /// See [`send`].
    pub fn send(&self, connection: &Connection, message: &R) -> bool {
        send(connection, message)
    }

    /// See [`broadcast`].
    pub fn broadcast(&self, room: &Room, message: &R, exclude: &[&str]) -> usize {
        broadcast(room, message, exclude)
    }

    /// Identity. Only pins the message to `R` at the call site.
    pub fn create(&self, message: R) -> R {
        message
    }
}

impl<R: Serialize> Default for ResponseChannel<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partywire_core::logging::capture_logs;
    use serde::ser::Error as _;
    use serde_json::{Value, json};

    #[derive(Serialize)]
    #[serde(tag = "type", rename_all = "kebab-case")]
    enum Reply {
        Pong { size: usize },
        Counter { count: i64 },
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("nope"))
        }
    }

    fn member(room: &Room, id: &str) -> tokio::sync::mpsc::Receiver<Arc<str>> {
        let (conn, rx) = Connection::channel(id, 8);
        room.join(conn);
        rx
    }

    #[tokio::test]
    async fn send_encodes_once() {
        let (conn, mut rx) = Connection::channel("a", 4);
        assert!(send(&conn, &json!({"type": "pong", "size": 1})));
        let got: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(got, json!({"type": "pong", "size": 1}));
    }

    #[tokio::test]
    async fn broadcast_with_exclusion_is_byte_identical() {
        let room = Room::new("r");
        let mut a = member(&room, "a");
        let mut b = member(&room, "b");
        let mut c = member(&room, "c");

        let n = broadcast(&room, &Reply::Counter { count: 10 }, &["b"]);
        assert_eq!(n, 2);

        let pa = a.recv().await.unwrap();
        let pc = c.recv().await.unwrap();
        assert_eq!(pa, pc);
        assert!(Arc::ptr_eq(&pa, &pc));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_empty_room() {
        let room = Room::new("r");
        assert_eq!(broadcast(&room, &json!({"type": "x"}), &[]), 0);
    }

    #[test]
    fn serialize_failure_sends_nothing() {
        let (logs, _guard) = capture_logs();
        let room = Room::new("r");
        let mut rx = member(&room, "a");
        assert_eq!(broadcast(&room, &Unserializable, &[]), 0);
        assert!(rx.try_recv().is_err());

        let (conn, mut rx2) = Connection::channel("b", 4);
        assert!(!send(&conn, &Unserializable));
        assert!(rx2.try_recv().is_err());
        assert!(logs.has_event(tracing::Level::WARN, "failed to serialize"));
    }

    #[tokio::test]
    async fn typed_channel_pins_response() {
        let responses = ResponseChannel::<Reply>::new();
        let room = Room::new("r");
        let mut rx = member(&room, "a");
        let (conn, _crx) = Connection::channel("z", 1);

        let reply = responses.create(Reply::Pong { size: room.len() });
        assert!(responses.send(&conn, &reply));
        assert_eq!(responses.broadcast(&room, &reply, &[]), 1);

        let got: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(got, json!({"type": "pong", "size": 1}));
    }
}
