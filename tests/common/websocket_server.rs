// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::net::SocketAddr;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tt::{accept_async, WebSocketStream};

/// Mock the media server: JSON sent into `to_streamer_rx` is written to the websocket,
/// everything the streamer sends ends up in `to_media_server_tx`.
pub(crate) async fn start_websocket_server(
    to_streamer_rx: mpsc::Receiver<serde_json::Value>,
    to_media_server_tx: mpsc::Sender<serde_json::Value>,
) -> SocketAddr {
    log::info!("Start websocket for the communication between streamer and media server");

    let (connection_tx, connection_rx) = oneshot::channel();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to create tcp listener to mock the media server");

    let local_addr = listener
        .local_addr()
        .expect("unable to get local_addr from tcp listener");

    tokio::spawn(async move {
        connection_tx
            .send(())
            .expect("unable to unblock the connection_tx");
        let (connection, _) = listener.accept().await.expect("No connections to accept");
        let stream = accept_async(connection)
            .await
            .expect("Failed to handshake with connection");

        let (stream_tx, stream_rx) = stream.split();

        tokio::spawn(send_data_to_websocket(stream_tx, to_streamer_rx));
        tokio::spawn(receive_data_from_websocket(stream_rx, to_media_server_tx));
    });

    log::debug!("Waiting for the websocket to be ready...");

    connection_rx.await.expect("Websocket not ready");

    local_addr
}

async fn send_data_to_websocket(
    mut stream_tx: SplitSink<WebSocketStream<TcpStream>, tt::tungstenite::Message>,
    mut to_streamer_rx: mpsc::Receiver<serde_json::Value>,
) {
    while let Some(message) = to_streamer_rx.recv().await {
        log::debug!("Send message to streamer: {message}");
        stream_tx
            .send(tt::tungstenite::Message::Text(message.to_string()))
            .await
            .expect("unable to send data to the streamer");
    }
    let _ = stream_tx.close().await;
}

async fn receive_data_from_websocket(
    mut stream_rx: SplitStream<WebSocketStream<TcpStream>>,
    to_media_server_tx: mpsc::Sender<serde_json::Value>,
) {
    while let Some(Ok(message)) = stream_rx.next().await {
        if let tt::tungstenite::Message::Text(text) = message {
            let value = serde_json::from_str(&text).expect("streamer sent invalid JSON");
            if to_media_server_tx.send(value).await.is_err() {
                break;
            }
        }
    }
}
