// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::Context;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    BridgeTransport, Error, MediaKind, MediaRouter, MediaTap, ParticipantId, PortAllocator,
    PortPair, Result, SessionDescriptor,
};

/// Parameters of a [`MediaBridge`]
#[derive(Debug, Clone)]
pub struct BridgeParameters {
    /// Address the bridge transports listen on and send to
    pub listen_ip: IpAddr,
    /// Directory to write the session descriptors into
    pub descriptor_dir: PathBuf,
    /// Port to start the search for video port pairs at
    pub video_port_base: u16,
    /// Port to start the search for audio port pairs at
    pub audio_port_base: u16,
    /// Interval of key frame requests on video taps, zero disables them
    pub key_frame_interval: Duration,
    /// Session name written into the descriptors
    pub session_name: String,
}

impl Default for BridgeParameters {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            descriptor_dir: PathBuf::from("./hls_output"),
            video_port_base: 20000,
            audio_port_base: 21000,
            key_frame_interval: Duration::from_secs(2),
            session_name: "opentalk-hls".to_string(),
        }
    }
}

/// Bridges published streams out of the SFU into local UDP ports.
#[derive(Debug)]
pub struct MediaBridge {
    router: Arc<dyn MediaRouter>,
    ports: PortAllocator,
    params: BridgeParameters,
}

/// A bridged stream of one participant.
///
/// Must be given back to [`MediaBridge::release`]. Dropping it only stops the key frame
/// requests.
#[derive(Debug)]
pub struct BridgedLeg {
    participant: ParticipantId,
    kind: MediaKind,
    ports: PortPair,
    descriptor: PathBuf,
    transport: Arc<dyn BridgeTransport>,
    tap: Arc<dyn MediaTap>,
    key_frames: Option<JoinHandle<()>>,
}

impl BridgedLeg {
    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// Path of the session descriptor
    #[must_use]
    pub fn descriptor(&self) -> &Path {
        &self.descriptor
    }
}

impl Drop for BridgedLeg {
    fn drop(&mut self) {
        if let Some(key_frames) = self.key_frames.take() {
            key_frames.abort();
        }
    }
}

impl MediaBridge {
    #[must_use]
    pub fn new(router: Arc<dyn MediaRouter>, ports: PortAllocator, params: BridgeParameters) -> Self {
        Self {
            router,
            ports,
            params,
        }
    }

    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Path of the descriptor of a participant's stream.
    ///
    /// Everything but ASCII alphanumerics, `-` and `_` in the participant id is percent
    /// escaped, so the descriptor always lands directly in the descriptor directory.
    #[must_use]
    pub fn descriptor_path(&self, participant: &ParticipantId, kind: MediaKind) -> PathBuf {
        self.params
            .descriptor_dir
            .join(format!("{}_{kind}.sdp", file_name_safe(&participant.0)))
    }

    fn port_base(&self, kind: MediaKind) -> u16 {
        match kind {
            MediaKind::Video => self.params.video_port_base,
            MediaKind::Audio => self.params.audio_port_base,
        }
    }

    /// Bridge the published stream `producer_id` of `participant`.
    ///
    /// Everything set up so far is rolled back if a step fails.
    ///
    /// # Errors
    ///
    /// Port allocation errors are returned as they are, all others as [`Error::BridgeSetup`].
    pub async fn bridge(
        &self,
        participant: &ParticipantId,
        kind: MediaKind,
        producer_id: &str,
    ) -> Result<BridgedLeg> {
        trace!("bridge( {participant}, {kind}, {producer_id} )");

        let ports = self.ports.allocate(self.port_base(kind)).await?;

        let transport = match self
            .router
            .create_bridge_transport(self.params.listen_ip)
            .await
            .context("failed to create bridge transport")
        {
            Ok(transport) => transport,
            Err(reason) => {
                self.ports.release(ports.rtp);
                return Err(Error::BridgeSetup {
                    participant: participant.clone(),
                    kind,
                    reason,
                });
            }
        };

        let descriptor = self.descriptor_path(participant, kind);
        let tap = match self
            .connect_tap(transport.as_ref(), kind, producer_id, ports, &descriptor)
            .await
        {
            Ok(tap) => tap,
            Err(reason) => {
                transport.close().await;
                self.ports.release(ports.rtp);
                return Err(Error::BridgeSetup {
                    participant: participant.clone(),
                    kind,
                    reason,
                });
            }
        };

        let key_frames = (kind == MediaKind::Video && !self.params.key_frame_interval.is_zero())
            .then(|| spawn_key_frame_requests(tap.clone(), self.params.key_frame_interval));

        debug!(
            "Bridged {kind} of {participant} to {}:{ports} ({})",
            transport.local_ip(),
            descriptor.display()
        );

        Ok(BridgedLeg {
            participant: participant.clone(),
            kind,
            ports,
            descriptor,
            transport,
            tap,
            key_frames,
        })
    }

    async fn connect_tap(
        &self,
        transport: &dyn BridgeTransport,
        kind: MediaKind,
        producer_id: &str,
        ports: PortPair,
        descriptor: &Path,
    ) -> anyhow::Result<Arc<dyn MediaTap>> {
        let local_ip = transport.local_ip();
        transport
            .connect(local_ip, ports.rtp, ports.rtcp)
            .await
            .context("failed to connect bridge transport")?;

        let tap = transport
            .consume(producer_id, false)
            .await
            .with_context(|| format!("failed to tap producer {producer_id}"))?;

        if tap.kind() != kind {
            let tapped = tap.kind();
            tap.close().await;
            anyhow::bail!("producer {producer_id} delivers {tapped}, not {kind}");
        }

        let written = async {
            SessionDescriptor::for_tap(&self.params.session_name, local_ip, ports, kind, tap.as_ref())?
                .write(descriptor)
                .await
        }
        .await;

        match written {
            Ok(()) => Ok(tap),
            Err(e) => {
                tap.close().await;
                Err(e.context("failed to write session descriptor"))
            }
        }
    }

    /// Tear down a bridged stream and forget its ports and descriptor.
    pub async fn release(&self, mut leg: BridgedLeg) {
        trace!("release( {}, {} )", leg.participant, leg.kind);

        if let Some(key_frames) = leg.key_frames.take() {
            key_frames.abort();
        }
        leg.tap.close().await;
        leg.transport.close().await;
        self.ports.release(leg.ports.rtp);
        self.remove_descriptor(&leg.descriptor).await;
    }

    /// Remove a single descriptor file, failures are only logged.
    pub async fn remove_descriptor(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed descriptor {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Unable to remove descriptor {}: {e}", path.display()),
        }
    }

    /// Remove every descriptor file in the descriptor directory.
    pub async fn remove_all_descriptors(&self) {
        let dir = &self.params.descriptor_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("Unable to read descriptor directory {}: {e}", dir.display());
                return;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().is_some_and(|ext| ext == "sdp") {
                        self.remove_descriptor(&path).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Unable to read descriptor directory {}: {e}", dir.display());
                    break;
                }
            }
        }
    }
}

fn file_name_safe(name: &str) -> String {
    let mut safe = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            safe.push(char::from(byte));
        } else {
            safe.push_str(&format!("%{byte:02X}"));
        }
    }
    safe
}

fn spawn_key_frame_requests(tap: Arc<dyn MediaTap>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tap.is_closed() {
                break;
            }
            if let Err(e) = tap.request_key_frame().await {
                debug!("Key frame request on tap {} failed: {e:#}", tap.id());
            }
        }
    })
}
