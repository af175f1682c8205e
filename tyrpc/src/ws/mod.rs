use std::sync::Arc;

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use hyper_tungstenite::{HyperWebsocketStream, tungstenite};
use tokio::sync::mpsc;

use crate::{Error, ErrorKind, Metadata, Result, ServerMessage, Socket, State};

type Stream = HyperWebsocketStream;

/// Destroys the connection's subscriptions however the connection task ends,
/// including cancellation on server stop.
struct SocketGuard(Socket);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// Runs a subscription connection until either side closes it.
pub(crate) async fn serve(state: &Arc<State>, stream: Stream, metadata: Metadata) {
    let addr = metadata.remote_addr;
    let (send_stream, recv_stream) = stream.split();
    let (sender, receiver) = mpsc::channel(state.config.outbound_queue_size);
    let socket = Socket::new(state.router.clone(), metadata, sender);
    let _guard = SocketGuard(socket.clone());
    tracing::debug!("subscription connection {addr:?} opened");

    tokio::select! {
        r = start_send_loop(send_stream, receiver) => {
            if let Err(e) = r {
                tracing::debug!("send loop for {addr:?} failed: {e}");
            }
        }
        r = start_recv_loop(recv_stream, &socket) => {
            if let Err(e) = r {
                tracing::debug!("recv loop for {addr:?} failed: {e}");
            }
        }
    }
    tracing::debug!("subscription connection {addr:?} closed");
}

async fn start_recv_loop(mut recv_stream: SplitStream<Stream>, socket: &Socket) -> Result<()> {
    while let Some(msg) = recv_stream.next().await {
        let msg = msg.map_err(|e| Error::new(ErrorKind::Transport, e.to_string()))?;
        match msg {
            tungstenite::Message::Text(text) => {
                socket.handle_message(&text);
            }
            tungstenite::Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    socket.handle_message(text);
                }
                Err(_) => tracing::debug!("drop non-UTF-8 binary frame"),
            },
            tungstenite::Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

async fn start_send_loop(
    mut send_stream: SplitSink<Stream, tungstenite::Message>,
    mut receiver: mpsc::Receiver<ServerMessage>,
) -> Result<()> {
    while let Some(msg) = receiver.recv().await {
        let text = serde_json::to_string(&msg)?;
        send_stream
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, e.to_string()))?;
    }
    Ok(())
}
