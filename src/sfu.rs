// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! SFU access over the bridge requests of the signaling connection.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use compositor::{BridgeTransport, CodecParameters, MediaKind, MediaRouter, MediaTap};
use parking_lot::Mutex;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

use crate::signaling::{
    incoming::Response,
    outgoing::{BridgeAction, BridgeRequest},
};

type Pending = HashMap<u64, oneshot::Sender<Result<serde_json::Value, String>>>;

/// Shared state of a [`RemoteRouter`] and its transports and taps
#[derive(Debug)]
struct Requester {
    requests: mpsc::Sender<BridgeRequest>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    request_timeout: Duration,
    /// Taps which were not closed by us yet, `true` once the media server closed them
    taps: Mutex<HashMap<String, bool>>,
}

impl Requester {
    async fn request(&self, action: BridgeAction) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        log::trace!("bridge request {id}: {action:?}");
        if self
            .requests
            .send(BridgeRequest { id, action })
            .await
            .is_err()
        {
            self.pending.lock().remove(&id);
            anyhow::bail!("signaling connection is gone");
        }

        let response = timeout(self.request_timeout, rx).await;
        self.pending.lock().remove(&id);
        match response {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(anyhow!("media server refused bridge request: {error}")),
            Ok(Err(_)) => Err(anyhow!("bridge request {id} was dropped")),
            Err(_) => Err(anyhow!("bridge request {id} timed out")),
        }
    }
}

/// [`MediaRouter`] which forwards every call as a bridge request to the media server.
///
/// Requests are handed out through the channel given to [`RemoteRouter::new`], the answers
/// must be passed to [`RemoteRouter::resolve`].
#[derive(Debug, Clone)]
pub struct RemoteRouter {
    requester: Arc<Requester>,
}

impl RemoteRouter {
    #[must_use]
    pub fn new(requests: mpsc::Sender<BridgeRequest>, request_timeout: Duration) -> Self {
        Self {
            requester: Arc::new(Requester {
                requests,
                pending: Mutex::default(),
                next_id: AtomicU64::new(1),
                request_timeout,
                taps: Mutex::default(),
            }),
        }
    }

    /// Complete the request `response` answers.
    pub fn resolve(&self, response: Response) {
        let Some(tx) = self.requester.pending.lock().remove(&response.id) else {
            log::warn!("Got response to unknown bridge request {}", response.id);
            return;
        };
        let result = match (response.error, response.result) {
            (Some(error), _) => Err(error),
            (None, result) => Ok(result.unwrap_or_default()),
        };
        let _ = tx.send(result);
    }

    /// Fail all outstanding requests, e.g. after the connection was lost.
    pub fn fail_pending(&self, reason: &str) {
        for (_, tx) in self.requester.pending.lock().drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// The media server closed a tap on its own.
    pub fn tap_closed(&self, tap_id: &str) {
        match self.requester.taps.lock().get_mut(tap_id) {
            Some(closed) => {
                log::debug!("Media server closed tap {tap_id}");
                *closed = true;
            }
            None => log::debug!("Media server closed unknown tap {tap_id}"),
        }
    }

    /// Number of taps which were handed out and not closed yet
    #[must_use]
    pub fn open_taps(&self) -> usize {
        self.requester.taps.lock().len()
    }
}

#[derive(Debug, Deserialize)]
struct TransportCreated {
    transport_id: String,
    local_ip: IpAddr,
}

#[derive(Debug, Deserialize)]
struct TapCreated {
    tap_id: String,
    kind: MediaKind,
    codecs: Vec<RtpCodec>,
}

#[derive(Debug, Deserialize)]
struct RtpCodec {
    mime_type: String,
    payload_type: u8,
    clock_rate: u32,
    #[serde(default)]
    channels: Option<u8>,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
}

impl From<RtpCodec> for CodecParameters {
    fn from(codec: RtpCodec) -> Self {
        Self {
            mime_type: codec.mime_type,
            payload_type: codec.payload_type,
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: codec
                .parameters
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(value) => value,
                        value => value.to_string(),
                    };
                    (key, value)
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MediaRouter for RemoteRouter {
    async fn create_bridge_transport(
        &self,
        listen_ip: IpAddr,
    ) -> Result<Arc<dyn BridgeTransport>> {
        let value = self
            .requester
            .request(BridgeAction::CreateTransport { listen_ip })
            .await?;
        let created: TransportCreated =
            serde_json::from_value(value).context("invalid create_transport response")?;

        Ok(Arc::new(RemoteTransport {
            id: created.transport_id,
            local_ip: created.local_ip,
            requester: self.requester.clone(),
        }))
    }
}

#[derive(Debug)]
struct RemoteTransport {
    id: String,
    local_ip: IpAddr,
    requester: Arc<Requester>,
}

#[async_trait]
impl BridgeTransport for RemoteTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    async fn connect(&self, ip: IpAddr, rtp_port: u16, rtcp_port: u16) -> Result<()> {
        self.requester
            .request(BridgeAction::Connect {
                transport_id: self.id.clone(),
                ip,
                rtp_port,
                rtcp_port,
            })
            .await?;
        Ok(())
    }

    async fn consume(&self, producer_id: &str, paused: bool) -> Result<Arc<dyn MediaTap>> {
        let value = self
            .requester
            .request(BridgeAction::Consume {
                transport_id: self.id.clone(),
                producer_id: producer_id.to_string(),
                paused,
            })
            .await?;
        let created: TapCreated =
            serde_json::from_value(value).context("invalid consume response")?;

        self.requester
            .taps
            .lock()
            .insert(created.tap_id.clone(), false);

        Ok(Arc::new(RemoteTap {
            id: created.tap_id,
            kind: created.kind,
            codecs: created.codecs.into_iter().map(Into::into).collect(),
            closed: AtomicBool::new(false),
            requester: self.requester.clone(),
        }))
    }

    async fn close(&self) {
        if let Err(e) = self
            .requester
            .request(BridgeAction::CloseTransport {
                transport_id: self.id.clone(),
            })
            .await
        {
            log::warn!("Unable to close bridge transport {}: {e:#}", self.id);
        }
    }
}

#[derive(Debug)]
struct RemoteTap {
    id: String,
    kind: MediaKind,
    codecs: Vec<CodecParameters>,
    closed: AtomicBool,
    requester: Arc<Requester>,
}

#[async_trait]
impl MediaTap for RemoteTap {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn codecs(&self) -> &[CodecParameters] {
        &self.codecs
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
            || self.requester.taps.lock().get(&self.id) == Some(&true)
    }

    async fn request_key_frame(&self) -> Result<()> {
        self.requester
            .request(BridgeAction::RequestKeyFrame {
                tap_id: self.id.clone(),
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        // the media server already closed it
        if self.requester.taps.lock().remove(&self.id) == Some(true) {
            return;
        }
        if let Err(e) = self
            .requester
            .request(BridgeAction::CloseTap {
                tap_id: self.id.clone(),
            })
            .await
        {
            log::warn!("Unable to close tap {}: {e:#}", self.id);
        }
    }
}
