// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{bail, Context, Result};
use compositor::Command;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tt::{
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use crate::settings::SignalingSettings;

/// Connection to the media server which reports publishing changes and answers bridge requests.
#[derive(Debug)]
pub struct Signaling {
    connection: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Event emitted by [`Signaling::run`]
#[derive(Debug)]
pub enum Event {
    /// A publishing change to hand to the orchestrator
    Command(Command),
    BridgeResponse(incoming::Response),
    TapClosed(String),
    Close,
}

impl Signaling {
    pub async fn connect(settings: &SignalingSettings) -> Result<Self> {
        let websocket_request = settings.url.as_str().into_client_request()?;

        let (connection, _) = tt::connect_async(websocket_request)
            .await
            .context("failed create websocket connection")?;

        log::info!("Connected to {}", settings.url);

        Ok(Self { connection })
    }

    pub async fn run(&mut self) -> Result<Event> {
        loop {
            let Some(msg) = self.connection.next().await else {
                bail!("unexpected websocket disconnection");
            };
            let msg = msg.context("Failed to receive websocket message")?;
            if let Some(event) = self.handle_websocket_message(msg).await? {
                return Ok(event);
            }
        }
    }

    async fn handle_websocket_message(&mut self, msg: Message) -> Result<Option<Event>> {
        let parse_result = match msg {
            Message::Text(ref s) => serde_json::from_str::<incoming::Message>(s),
            Message::Binary(ref b) => serde_json::from_slice::<incoming::Message>(b),
            Message::Ping(data) => {
                self.connection.send(Message::Pong(data)).await?;
                return Ok(None);
            }
            Message::Pong(_) | Message::Frame(_) => return Ok(None),
            Message::Close(_) => {
                let _ = self.connection.close(None).await;
                return Ok(Some(Event::Close));
            }
        };

        let msg = match parse_result {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("Failed to parse incoming message {msg:?}, {e}");
                return Ok(None);
            }
        };

        Ok(Some(match msg {
            incoming::Message::Signaling(msg) => Event::Command(msg.into()),
            incoming::Message::Bridge(incoming::BridgeMessage::Response(response)) => {
                Event::BridgeResponse(response)
            }
            incoming::Message::Bridge(incoming::BridgeMessage::TapClosed { tap_id }) => {
                Event::TapClosed(tap_id)
            }
        }))
    }

    pub async fn send(&mut self, msg: outgoing::Message) -> Result<()> {
        log::trace!("send signaling message {:?}", msg);
        self.connection
            .send(Message::Text(
                serde_json::to_string(&msg).context("failed to serialize message")?,
            ))
            .await
            .context("failed to send message")
    }
}

pub mod incoming {
    use compositor::{Command, MediaKind, ParticipantId};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "namespace", content = "payload", rename_all = "snake_case")]
    pub enum Message {
        Signaling(SignalingMessage),
        Bridge(BridgeMessage),
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case", tag = "message")]
    pub enum SignalingMessage {
        PublishingStarted {
            participant: ParticipantId,
            kind: MediaKind,
            producer_id: String,
        },
        PublishingStopped {
            participant: ParticipantId,
            kind: MediaKind,
        },
        Left {
            participant: ParticipantId,
        },
    }

    impl From<SignalingMessage> for Command {
        fn from(msg: SignalingMessage) -> Self {
            match msg {
                SignalingMessage::PublishingStarted {
                    participant,
                    kind,
                    producer_id,
                } => Command::PublishingStarted {
                    participant,
                    kind,
                    producer_id,
                },
                SignalingMessage::PublishingStopped { participant, kind } => {
                    Command::PublishingStopped { participant, kind }
                }
                SignalingMessage::Left { participant } => Command::Left { participant },
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case", tag = "message")]
    pub enum BridgeMessage {
        Response(Response),
        TapClosed { tap_id: String },
    }

    /// Answer to a [`super::outgoing::BridgeRequest`] with the same id
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Response {
        pub id: u64,
        #[serde(default)]
        pub result: Option<serde_json::Value>,
        #[serde(default)]
        pub error: Option<String>,
    }
}

pub mod outgoing {
    use serde::{Deserialize, Serialize};
    use std::net::IpAddr;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "namespace", content = "payload", rename_all = "snake_case")]
    pub enum Message {
        Bridge(BridgeRequest),
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BridgeRequest {
        pub id: u64,
        #[serde(flatten)]
        pub action: BridgeAction,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case", tag = "action")]
    pub enum BridgeAction {
        CreateTransport {
            listen_ip: IpAddr,
        },
        Connect {
            transport_id: String,
            ip: IpAddr,
            rtp_port: u16,
            rtcp_port: u16,
        },
        Consume {
            transport_id: String,
            producer_id: String,
            paused: bool,
        },
        RequestKeyFrame {
            tap_id: String,
        },
        CloseTap {
            tap_id: String,
        },
        CloseTransport {
            transport_id: String,
        },
    }
}
