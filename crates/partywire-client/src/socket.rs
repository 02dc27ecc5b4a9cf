//! WebSocket binding for [`PartyClient`].

use futures::{SinkExt, StreamExt};
use partywire_core::Frame;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{ClientOptions, PartyClient, SocketSignal};
use crate::errors::ClientError;

/// A connected socket driving a [`PartyClient`].
///
/// One background task pumps the client's outbound queue into the socket and
/// inbound frames into [`PartyClient::dispatch`]. It fires `open` once
/// connected and `close` when the socket ends for any reason.
pub struct PartySocket {
    client: PartyClient,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PartySocket {
    /// Connect to `url` (for example `ws://127.0.0.1:1999/parties/main`).
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|source| ClientError::Connect {
                url: url.to_owned(),
                source: Box::new(source),
            })?;
        info!(url, "party socket connected");

        let (client, mut outbound) = PartyClient::channel(&options);
        let (mut sink, mut stream) = ws.split();
        let token = CancellationToken::new();

        client.notify(&SocketSignal::open());

        let task_client = client.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let close_frame = loop {
                tokio::select! {
                    () = task_token.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break None;
                    }
                    out = outbound.recv() => {
                        let Some(text) = out else { break None };
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!(error = %e, "party socket send failed");
                            task_client.notify(&SocketSignal::error(e.to_string()));
                            break None;
                        }
                    }
                    inbound = stream.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            task_client.dispatch(&Frame::Text(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(data))) => task_client.dispatch(&Frame::Binary(data)),
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "party socket receive failed");
                            task_client.notify(&SocketSignal::error(e.to_string()));
                            break None;
                        }
                        None => break None,
                    }
                }
            };
            debug!(frame = ?close_frame, "party socket closed");
            task_client.notify(&SocketSignal::close(close_frame));
        });

        Ok(Self {
            client,
            token,
            task,
        })
    }

    /// The dispatcher bound to this socket.
    pub fn client(&self) -> &PartyClient {
        &self.client
    }

    /// Whether the background task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Send a close frame and wait for the socket task to end.
    pub async fn close(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

// Socket behavior needs a live server; covered by the server crate's
// client round-trip tests.
