//! Client dispatcher: typed listeners over an inbound message stream.
//!
//! Listeners are keyed by message `type` (or by socket lifecycle event) and
//! invoked in registration order. Registering the same `Arc` twice is a
//! no-op. The dispatcher is transport-agnostic: [`PartySocket`] feeds it from
//! a WebSocket, tests feed it frames directly.
//!
//! [`PartySocket`]: crate::socket::PartySocket

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use partywire_core::message::WS_ERROR;
use partywire_core::{Envelope, ErrorReason, Frame, codec};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::errors::ClientError;

/// Callback for inbound messages of one type.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback for socket lifecycle events.
pub type SocketListener = Arc<dyn Fn(&SocketSignal) + Send + Sync>;

/// Socket lifecycle event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    /// Connection established.
    Open,
    /// Connection closed by either side.
    Close,
    /// Transport error.
    Error,
}

impl SocketEvent {
    /// Lowercase event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event with optional detail (close reason, error text).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketSignal {
    /// Which event fired.
    pub event: SocketEvent,
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Close reason or error message.
    pub detail: Option<String>,
}

impl SocketSignal {
    /// `open`
    pub fn open() -> Self {
        Self {
            event: SocketEvent::Open,
            code: None,
            detail: None,
        }
    }

    /// `close`, with the peer's close frame if any.
    pub fn close(frame: Option<(u16, String)>) -> Self {
        let (code, detail) = match frame {
            Some((code, reason)) => (Some(code), Some(reason)),
            None => (None, None),
        };
        Self {
            event: SocketEvent::Close,
            code,
            detail,
        }
    }

    /// `error`
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            event: SocketEvent::Error,
            code: None,
            detail: Some(detail.into()),
        }
    }
}

/// Debug logging of lifecycle events and inbound messages.
///
/// Only affects logging. Dispatch is never gated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DebugMode {
    /// No debug logs.
    #[default]
    Off,
    /// Log every lifecycle event and inbound message.
    All,
    /// Log lifecycle events, and inbound messages whose type starts with the prefix.
    Prefix(String),
}

impl DebugMode {
    fn logs_lifecycle(&self) -> bool {
        !matches!(self, Self::Off)
    }

    fn logs_message(&self, message_type: &str) -> bool {
        match self {
            Self::Off => false,
            Self::All => true,
            Self::Prefix(prefix) => message_type.starts_with(prefix.as_str()),
        }
    }
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Debug logging mode.
    pub debug: DebugMode,
    /// Outbound queue capacity.
    pub outbound_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            debug: DebugMode::Off,
            outbound_buffer: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Key {
    Message(String),
    Socket(SocketEvent),
}

#[derive(Default)]
struct Registries {
    responses: HashMap<String, Vec<Listener>>,
    sockets: HashMap<SocketEvent, Vec<SocketListener>>,
    closed: bool,
}

struct Inner {
    registries: Mutex<Registries>,
    outbound: mpsc::Sender<String>,
    debug: DebugMode,
}

/// Typed message dispatcher bound to an outbound queue.
///
/// Cheap to clone; clones share listeners and the queue.
#[derive(Clone)]
pub struct PartyClient {
    inner: Arc<Inner>,
}

impl PartyClient {
    /// Create a client writing to `outbound`.
    pub fn new(outbound: mpsc::Sender<String>, debug: DebugMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                registries: Mutex::new(Registries::default()),
                outbound,
                debug,
            }),
        }
    }

    /// Create a client plus the receiving end of its outbound queue.
    pub fn channel(options: &ClientOptions) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(options.outbound_buffer.max(1));
        (Self::new(tx, options.debug.clone()), rx)
    }

    /// Listen for messages of `message_type`.
    pub fn on<F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.on_listener(message_type, Arc::new(callback))
    }

    /// Listen with an existing listener. Registering the same `Arc` again for
    /// the same type does nothing. After [`unsubscribe`](Self::unsubscribe)
    /// nothing is registered and the returned handle is inactive.
    pub fn on_listener(&self, message_type: impl Into<String>, listener: Listener) -> Subscription {
        let message_type = message_type.into();
        {
            let mut registries = self.inner.registries.lock();
            if registries.closed {
                warn!(message_type = %message_type, "listener registered after unsubscribe, ignoring");
                return Subscription::inactive(&self.inner, Key::Message(message_type), Handle::Message(listener));
            }
            let set = registries.responses.entry(message_type.clone()).or_default();
            if !set.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                set.push(Arc::clone(&listener));
            }
        }
        Subscription::new(&self.inner, Key::Message(message_type), Handle::Message(listener))
    }

    /// Listen for messages of `message_type`, deserialized into `T`.
    ///
    /// Messages that do not fit `T` are logged and skipped.
    pub fn on_typed<T, F>(&self, message_type: impl Into<String>, callback: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on(message_type, move |envelope: &Envelope| match envelope.parse::<T>() {
            Ok(message) => callback(message),
            Err(e) => warn!(
                message_type = envelope.message_type(),
                error = %e,
                "message does not fit listener type, skipping"
            ),
        })
    }

    /// Listen for a socket lifecycle event.
    pub fn on_socket<F>(&self, event: SocketEvent, callback: F) -> Subscription
    where
        F: Fn(&SocketSignal) + Send + Sync + 'static,
    {
        self.on_socket_listener(event, Arc::new(callback))
    }

    /// Listen for a lifecycle event with an existing listener.
    pub fn on_socket_listener(&self, event: SocketEvent, listener: SocketListener) -> Subscription {
        {
            let mut registries = self.inner.registries.lock();
            if registries.closed {
                warn!(event = %event, "socket listener registered after unsubscribe, ignoring");
                return Subscription::inactive(&self.inner, Key::Socket(event), Handle::Socket(listener));
            }
            let set = registries.sockets.entry(event).or_default();
            if !set.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                set.push(Arc::clone(&listener));
            }
        }
        Subscription::new(&self.inner, Key::Socket(event), Handle::Socket(listener))
    }

    /// Number of listeners for `message_type`.
    pub fn listener_count(&self, message_type: &str) -> usize {
        self.inner
            .registries
            .lock()
            .responses
            .get(message_type)
            .map_or(0, Vec::len)
    }

    /// Number of listeners for `event`.
    pub fn socket_listener_count(&self, event: SocketEvent) -> usize {
        self.inner
            .registries
            .lock()
            .sockets
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Serialize `message` and queue it for the socket.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), ClientError> {
        let text = codec::encode(message)?;
        self.inner.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::QueueFull,
            TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    /// Identity: returns `message` unchanged.
    pub fn create<T>(&self, message: T) -> T {
        message
    }

    /// Clear every listener and stop dispatching.
    pub fn unsubscribe(&self) {
        let mut registries = self.inner.registries.lock();
        registries.responses.clear();
        registries.sockets.clear();
        registries.closed = true;
        drop(registries);
        debug!("party client unsubscribed");
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.registries.lock().closed
    }

    /// Route one inbound frame to its listeners.
    ///
    /// A frame that is not a JSON object with a string `type` is delivered to
    /// `ws.error` listeners as an `empty message` error.
    pub fn dispatch(&self, frame: &Frame) {
        let envelope = match codec::decode(frame).and_then(|v| Envelope::try_from(v).ok()) {
            Some(envelope) => envelope,
            None => {
                warn!("unparsable inbound message, reporting as ws.error");
                Envelope::new(WS_ERROR).with("reason", ErrorReason::EmptyMessage.as_str())
            }
        };

        if self.inner.debug.logs_message(envelope.message_type()) {
            debug!(
                message_type = envelope.message_type(),
                message = ?envelope.fields(),
                "party message"
            );
        }

        let listeners = {
            let registries = self.inner.registries.lock();
            if registries.closed {
                return;
            }
            registries
                .responses
                .get(envelope.message_type())
                .cloned()
                .unwrap_or_default()
        };

        for listener in listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&envelope)));
            if result.is_err() {
                warn!(message_type = envelope.message_type(), "listener panicked");
            }
        }
    }

    /// Fan a lifecycle event out to its listeners.
    pub fn notify(&self, signal: &SocketSignal) {
        let listeners = {
            let registries = self.inner.registries.lock();
            if registries.closed {
                return;
            }
            registries
                .sockets
                .get(&signal.event)
                .cloned()
                .unwrap_or_default()
        };

        if self.inner.debug.logs_lifecycle() {
            debug!(event = %signal.event, detail = ?signal.detail, "party socket event");
        }

        for listener in listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(signal)));
            if result.is_err() {
                warn!(event = %signal.event, "socket listener panicked");
            }
        }
    }
}

impl fmt::Debug for PartyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registries = self.inner.registries.lock();
        f.debug_struct("PartyClient")
            .field("types", &registries.responses.len())
            .field("socket_events", &registries.sockets.len())
            .field("closed", &registries.closed)
            .finish_non_exhaustive()
    }
}

enum Handle {
    Message(Listener),
    Socket(SocketListener),
}

/// Removes one listener registration.
pub struct Subscription {
    inner: Weak<Inner>,
    key: Key,
    handle: Handle,
    done: AtomicBool,
}

impl Subscription {
    fn new(inner: &Arc<Inner>, key: Key, handle: Handle) -> Self {
        Self {
            inner: Arc::downgrade(inner),
            key,
            handle,
            done: AtomicBool::new(false),
        }
    }

    fn inactive(inner: &Arc<Inner>, key: Key, handle: Handle) -> Self {
        let subscription = Self::new(inner, key, handle);
        subscription.done.store(true, Ordering::SeqCst);
        subscription
    }

    /// Whether the listener is still registered through this handle.
    pub fn is_active(&self) -> bool {
        !self.done.load(Ordering::SeqCst) && self.inner.strong_count() > 0
    }

    /// Remove the listener. Later calls do nothing.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut registries = inner.registries.lock();
        match (&self.key, &self.handle) {
            (Key::Message(message_type), Handle::Message(listener)) => {
                if let Some(set) = registries.responses.get_mut(message_type) {
                    set.retain(|l| !Arc::ptr_eq(l, listener));
                }
            }
            (Key::Socket(event), Handle::Socket(listener)) => {
                if let Some(set) = registries.sockets.get_mut(event) {
                    set.retain(|l| !Arc::ptr_eq(l, listener));
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("done", &self.done.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partywire_core::logging::capture_logs;
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicUsize;
    use tracing::Level;

    fn client() -> (PartyClient, mpsc::Receiver<String>) {
        PartyClient::channel(&ClientOptions::default())
    }

    fn text(value: &Value) -> Frame {
        Frame::Text(value.to_string())
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Envelope) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |env: &Envelope| sink.lock().push(env.clone().into_value()))
    }

    // ── Dispatch ───────────────────────────────────────────────────

    #[test]
    fn dispatches_by_type() {
        let (client, _rx) = client();
        let (pongs, on_pong) = recorder();
        let (counters, on_counter) = recorder();
        let _a = client.on("pong", on_pong);
        let _b = client.on("counter", on_counter);

        client.dispatch(&text(&json!({"type": "pong", "size": 2})));
        assert_eq!(*pongs.lock(), vec![json!({"type": "pong", "size": 2})]);
        assert!(counters.lock().is_empty());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let (client, _rx) = client();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            let _ = client.on("tick", move |_env: &Envelope| order.lock().push(i));
        }
        client.dispatch(&text(&json!({"type": "tick"})));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let (client, _rx) = client();
        let (seen, cb) = recorder();
        let _sub = client.on("pong", cb);
        client.dispatch(&text(&json!({"type": "other"})));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn binary_frames_dispatch() {
        let (client, _rx) = client();
        let (seen, cb) = recorder();
        let _sub = client.on("pong", cb);
        client.dispatch(&Frame::from(br#"{"type":"pong"}"#.to_vec()));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn unparsable_payload_becomes_ws_error() {
        let (client, _rx) = client();
        let (errors, cb) = recorder();
        let _sub = client.on(WS_ERROR, cb);
        let (logs, _guard) = capture_logs();

        client.dispatch(&Frame::from("{oops"));
        client.dispatch(&text(&json!({"no_type": true})));

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], json!({"type": "ws.error", "reason": "empty message"}));
        assert!(logs.has_event(Level::WARN, "unparsable inbound message"));
    }

    #[test]
    fn server_ws_error_reaches_listeners_with_issues() {
        let (client, _rx) = client();
        let (errors, cb) = recorder();
        let _sub = client.on(WS_ERROR, cb);
        client.dispatch(&text(&json!({
            "type": "ws.error",
            "reason": "invalid message",
            "issues": [{"message": "bad", "path": ["amount"]}]
        })));
        assert_eq!(errors.lock()[0]["issues"][0]["path"], json!(["amount"]));
    }

    #[test]
    fn panicking_listener_does_not_stop_fan_out() {
        let (client, _rx) = client();
        let _a = client.on("tick", |_env: &Envelope| panic!("listener bug"));
        let (seen, cb) = recorder();
        let _b = client.on("tick", cb);
        client.dispatch(&text(&json!({"type": "tick"})));
        assert_eq!(seen.lock().len(), 1);
    }

    // ── Subscriptions ──────────────────────────────────────────────

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let (client, _rx) = client();
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();
        let sub1 = client.on("tick", cb1);
        let _sub2 = client.on("tick", cb2);

        sub1.unsubscribe();
        client.dispatch(&text(&json!({"type": "tick"})));
        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn double_unsubscribe_is_noop() {
        let (client, _rx) = client();
        let listener: Listener = Arc::new(|_env: &Envelope| {});
        let sub = client.on_listener("tick", Arc::clone(&listener));
        sub.unsubscribe();
        // Re-registered by someone else; the stale handle must not remove it
        let _again = client.on_listener("tick", listener);
        sub.unsubscribe();
        assert_eq!(client.listener_count("tick"), 1);
    }

    #[test]
    fn same_listener_registers_once() {
        let (client, _rx) = client();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: Listener = Arc::new(move |_env: &Envelope| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });
        let _a = client.on_listener("tick", Arc::clone(&listener));
        let _b = client.on_listener("tick", listener);
        assert_eq!(client.listener_count("tick"), 1);

        client.dispatch(&text(&json!({"type": "tick"})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_client_is_harmless() {
        let (client, _rx) = client();
        let sub = client.on("tick", |_env: &Envelope| {});
        drop(client);
        sub.unsubscribe();
    }

    #[test]
    fn global_unsubscribe_clears_everything() {
        let (client, _rx) = client();
        let (seen, cb) = recorder();
        let _sub = client.on("tick", cb);
        let opened = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&opened);
        let _s = client.on_socket(SocketEvent::Open, move |_s: &SocketSignal| {
            let _ = o.fetch_add(1, Ordering::SeqCst);
        });

        client.unsubscribe();
        assert!(client.is_closed());
        assert_eq!(client.listener_count("tick"), 0);
        assert_eq!(client.socket_listener_count(SocketEvent::Open), 0);

        client.dispatch(&text(&json!({"type": "tick"})));
        client.notify(&SocketSignal::open());
        assert!(seen.lock().is_empty());
        assert_eq!(opened.load(Ordering::SeqCst), 0);

    }

    #[test]
    fn registration_after_teardown_is_inactive() {
        let (client, _rx) = client();
        client.unsubscribe();

        let (late, cb) = recorder();
        let sub = client.on("tick", cb);
        let socket_sub = client.on_socket(SocketEvent::Close, |_s: &SocketSignal| {});
        assert!(!sub.is_active());
        assert!(!socket_sub.is_active());
        assert_eq!(client.listener_count("tick"), 0);
        assert_eq!(client.socket_listener_count(SocketEvent::Close), 0);

        client.dispatch(&text(&json!({"type": "tick"})));
        assert!(late.lock().is_empty());
    }

    #[test]
    fn subscription_reports_activity() {
        let (client, _rx) = client();
        let sub = client.on("tick", |_env: &Envelope| {});
        assert!(sub.is_active());
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    // ── Typed listeners ────────────────────────────────────────────

    #[derive(Debug, Deserialize, PartialEq)]
    struct Counter {
        count: i64,
    }

    #[test]
    fn typed_listener_receives_struct() {
        let (client, _rx) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client.on_typed("counter", move |c: Counter| sink.lock().push(c.count));

        client.dispatch(&text(&json!({"type": "counter", "count": 10})));
        client.dispatch(&text(&json!({"type": "counter", "count": "ten"})));
        assert_eq!(*seen.lock(), vec![10]);
    }

    // ── Socket events ──────────────────────────────────────────────

    #[test]
    fn socket_listeners_receive_signals() {
        let (client, _rx) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client.on_socket(SocketEvent::Close, move |s: &SocketSignal| {
            sink.lock().push(s.clone());
        });

        client.notify(&SocketSignal::open());
        client.notify(&SocketSignal::close(Some((1000, "bye".into()))));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, Some(1000));
        assert_eq!(seen[0].detail.as_deref(), Some("bye"));
    }

    // ── Send ───────────────────────────────────────────────────────

    #[test]
    fn send_serializes_to_queue() {
        let (client, mut rx) = client();
        let msg = client.create(json!({"type": "add-to-counter", "amount": 5}));
        client.send(&msg).unwrap();
        let out: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(out, json!({"type": "add-to-counter", "amount": 5}));
    }

    #[test]
    fn send_reports_full_and_closed_queue() {
        let options = ClientOptions {
            outbound_buffer: 1,
            ..ClientOptions::default()
        };
        let (client, rx) = PartyClient::channel(&options);
        client.send(&json!({"type": "a"})).unwrap();
        assert!(matches!(client.send(&json!({"type": "b"})), Err(ClientError::QueueFull)));
        drop(rx);
        assert!(matches!(client.send(&json!({"type": "c"})), Err(ClientError::Closed)));
    }

    // ── Debug logging ──────────────────────────────────────────────

    #[test]
    fn debug_off_logs_nothing() {
        let (client, _rx) = client();
        let (logs, _guard) = capture_logs();
        client.dispatch(&text(&json!({"type": "tick"})));
        client.notify(&SocketSignal::open());
        assert_eq!(logs.count_at_level(Level::DEBUG), 0);
    }

    #[test]
    fn debug_prefix_gates_message_logs_only() {
        let options = ClientOptions {
            debug: DebugMode::Prefix("chat.".into()),
            ..ClientOptions::default()
        };
        let (client, _rx) = PartyClient::channel(&options);
        let (seen, cb) = recorder();
        let _sub = client.on("presence", cb);
        let (logs, _guard) = capture_logs();

        client.dispatch(&text(&json!({"type": "chat.message", "text": "hi"})));
        client.dispatch(&text(&json!({"type": "presence"})));
        client.notify(&SocketSignal::open());

        assert_eq!(logs.matching("party message").len(), 1);
        assert!(logs.has_field("message_type", "chat.message"));
        assert!(logs.has_message("party socket event"));
        // Unlogged messages still dispatch
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn debug_all_logs_every_message() {
        let options = ClientOptions {
            debug: DebugMode::All,
            ..ClientOptions::default()
        };
        let (client, _rx) = PartyClient::channel(&options);
        let (logs, _guard) = capture_logs();
        client.dispatch(&text(&json!({"type": "a"})));
        client.dispatch(&text(&json!({"type": "b"})));
        assert_eq!(logs.matching("party message").len(), 2);
    }
}
