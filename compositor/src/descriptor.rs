// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use std::{
    fmt::Write as _,
    io::Write as _,
    net::IpAddr,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::{CodecParameters, MediaKind, MediaTap, PortPair};

/// Session description of one bridged stream as read by the transcoder.
///
/// Renders a receive only SDP with a single media section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub session_name: String,
    /// Address the media arrives at
    pub address: IpAddr,
    pub kind: MediaKind,
    pub ports: PortPair,
    /// The codec in use
    pub codec: CodecParameters,
}

impl SessionDescriptor {
    /// Describe the media of `tap` arriving at `address` and `ports`.
    ///
    /// # Errors
    ///
    /// Fails if the tap did not negotiate any codec.
    pub fn for_tap(
        session_name: &str,
        address: IpAddr,
        ports: PortPair,
        kind: MediaKind,
        tap: &dyn MediaTap,
    ) -> Result<Self> {
        let Some(codec) = tap.codecs().first() else {
            anyhow::bail!("media tap {} has no codec", tap.id());
        };

        Ok(Self {
            session_name: session_name.to_string(),
            address,
            kind,
            ports,
            codec: codec.clone(),
        })
    }

    /// Write the descriptor to `path`.
    ///
    /// The content is written into a temporary file in the same directory which then
    /// replaces `path`, so a reader never sees a partial descriptor.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let content = self.to_string();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, content.as_bytes()))
            .await
            .context("descriptor writer panicked")?
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("unable to create directory {}", dir.display()))?;
    let mut file = NamedTempFile::new_in(&dir)
        .with_context(|| format!("unable to create temporary file in {}", dir.display()))?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("unable to write {}", path.display()))?;
    Ok(())
}

impl std::fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let family = match self.address {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        let pt = self.codec.payload_type;

        let mut rtpmap = format!(
            "{pt} {}/{}",
            self.codec.encoding_name(),
            self.codec.clock_rate
        );
        if self.kind == MediaKind::Audio {
            write!(rtpmap, "/{}", self.codec.channels.unwrap_or(1))?;
        }

        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- 0 0 IN {family} {}", self.address),
            format!("s={}", self.session_name),
            format!("c=IN {family} {}", self.address),
            "t=0 0".to_string(),
            format!("m={} {} RTP/AVP {pt}", self.kind, self.ports.rtp),
            format!("a=rtcp:{}", self.ports.rtcp),
            format!("a=rtpmap:{rtpmap}"),
        ];
        if !self.codec.parameters.is_empty() {
            let fmtp: Vec<String> = self
                .codec
                .parameters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            lines.push(format!("a=fmtp:{pt} {}", fmtp.join(";")));
        }
        lines.push("a=recvonly".to_string());

        for line in lines {
            write!(f, "{line}\r\n")?;
        }
        Ok(())
    }
}
