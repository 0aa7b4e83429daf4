// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug, net::IpAddr, sync::Arc};

/// Signaling id of a call participant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of a media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Get media kind as string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A codec negotiated for a media tap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParameters {
    /// e.g. `video/VP8`
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default)]
    pub channels: Option<u8>,
    /// format specific parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl CodecParameters {
    /// Codec name without the media type prefix.
    #[must_use]
    pub fn encoding_name(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map_or(self.mime_type.as_str(), |(_, name)| name)
    }
}

/// Access to the SFU router which holds the published streams.
#[async_trait]
pub trait MediaRouter: Debug + Send + Sync + 'static {
    /// Create a plain RTP transport listening on `listen_ip`.
    async fn create_bridge_transport(
        &self,
        listen_ip: IpAddr,
    ) -> anyhow::Result<Arc<dyn BridgeTransport>>;
}

/// A transport which sends media out of the SFU to a fixed address.
#[async_trait]
pub trait BridgeTransport: Debug + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Address the transport is bound to.
    fn local_ip(&self) -> IpAddr;

    /// Set the destination of the RTP and RTCP packets.
    async fn connect(&self, ip: IpAddr, rtp_port: u16, rtcp_port: u16) -> anyhow::Result<()>;

    /// Create a receive side tap of the published stream `producer_id`.
    async fn consume(&self, producer_id: &str, paused: bool) -> anyhow::Result<Arc<dyn MediaTap>>;

    async fn close(&self);
}

/// Receive side consumer of a single published stream.
#[async_trait]
pub trait MediaTap: Debug + Send + Sync + 'static {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Negotiated codecs, the first one is in use.
    fn codecs(&self) -> &[CodecParameters];

    fn is_closed(&self) -> bool;

    async fn request_key_frame(&self) -> anyhow::Result<()>;

    async fn close(&self);
}
