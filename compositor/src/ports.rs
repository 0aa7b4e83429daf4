// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use parking_lot::Mutex;
use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::net::UdpSocket;

use crate::{Error, Result};

/// A RTP port and the related RTCP port (`rtp + 1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortPair {
    pub rtp: u16,
    pub rtcp: u16,
}

impl std::fmt::Display for PortPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.rtp, self.rtcp)
    }
}

/// Parameters of a [`PortAllocator`]
#[derive(Debug, Clone)]
pub struct PortParameters {
    /// Address the probe sockets are bound to
    pub probe_ip: IpAddr,
    /// Number of scans before giving up
    pub attempts: u32,
    /// Number of candidate pairs per scan
    pub probe_limit: u32,
    /// Pause between two scans
    pub retry_delay: Duration,
    /// Distance between the start ports of two consecutive scans
    pub attempt_stride: u16,
}

impl Default for PortParameters {
    fn default() -> Self {
        Self {
            probe_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            attempts: 5,
            probe_limit: 100,
            retry_delay: Duration::from_secs(1),
            attempt_stride: 100,
        }
    }
}

/// Manages the RTP/RTCP ports the bridged media is sent to
///
/// Tracks all ports handed out so far. A candidate pair is reserved before it gets verified
/// against the operating system, so concurrent allocations never return the same pair.
///
/// Cloning gives another handle to the same registry.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    params: PortParameters,
    /// All reserved ports (RTP and RTCP)
    reserved: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortAllocator {
    #[must_use]
    pub fn new(params: PortParameters) -> Self {
        Self {
            params,
            reserved: Arc::default(),
        }
    }

    /// Allocate a free port pair at or above `preferred_base`.
    ///
    /// Scans up to [`PortParameters::attempts`] times, each scan starting
    /// [`PortParameters::attempt_stride`] ports above the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortExhaustion`] if none of the scans found a free pair.
    pub async fn allocate(&self, preferred_base: u16) -> Result<PortPair> {
        let attempts = self.params.attempts.max(1);
        for attempt in 0..attempts {
            let start = u32::from(preferred_base)
                + attempt * u32::from(self.params.attempt_stride);
            let Ok(start) = u16::try_from(start) else {
                break;
            };
            match self.scan(start).await {
                Ok(pair) => return Ok(pair),
                Err(e) => {
                    warn!("Port allocation attempt {} failed: {e}", attempt + 1);
                    if attempt + 1 < attempts && !self.params.retry_delay.is_zero() {
                        tokio::time::sleep(self.params.retry_delay).await;
                    }
                }
            }
        }
        Err(Error::PortExhaustion {
            base: preferred_base,
            attempts,
        })
    }

    async fn scan(&self, start: u16) -> Result<PortPair> {
        let mut rtp = u32::from(start);
        for _ in 0..self.params.probe_limit {
            let (Ok(pair_rtp), Ok(pair_rtcp)) = (u16::try_from(rtp), u16::try_from(rtp + 1))
            else {
                break;
            };
            let pair = PortPair {
                rtp: pair_rtp,
                rtcp: pair_rtcp,
            };
            rtp += 2;

            if !self.try_reserve(pair) {
                continue;
            }
            if self.probe(pair).await {
                trace!("Using port {} & {} for new RTP/RTCP connection", pair.rtp, pair.rtcp);
                return Ok(pair);
            }
            self.release(pair.rtp);
        }
        Err(Error::NoAvailablePort { start })
    }

    fn try_reserve(&self, pair: PortPair) -> bool {
        let mut reserved = self.reserved.lock();
        if reserved.contains(&pair.rtp) || reserved.contains(&pair.rtcp) {
            return false;
        }
        reserved.insert(pair.rtp);
        reserved.insert(pair.rtcp);
        true
    }

    /// Check that both ports can be bound right now.
    async fn probe(&self, pair: PortPair) -> bool {
        let rtp = UdpSocket::bind(SocketAddr::new(self.params.probe_ip, pair.rtp)).await;
        let rtcp = UdpSocket::bind(SocketAddr::new(self.params.probe_ip, pair.rtcp)).await;
        match (rtp, rtcp) {
            (Ok(_), Ok(_)) => true,
            (Err(e), _) | (_, Err(e)) => {
                debug!("Port pair {pair} is not available: {e}");
                false
            }
        }
    }

    /// Removes the port pair related to the provided RTP port
    pub fn release(&self, rtp: u16) {
        let mut reserved = self.reserved.lock();
        reserved.remove(&rtp);
        if let Some(rtcp) = rtp.checked_add(1) {
            reserved.remove(&rtcp);
        }
        trace!("Removed port {rtp} from port registry");
    }

    /// Forget all reserved ports
    pub fn clear(&self) {
        self.reserved.lock().clear();
        trace!("Cleared port registry");
    }

    #[must_use]
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().contains(&port)
    }

    /// Snapshot of all reserved ports
    #[must_use]
    pub fn reserved(&self) -> Vec<u16> {
        self.reserved.lock().iter().copied().collect()
    }
}
