// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{process::ExitStatus, time::Duration};

use crate::{MediaKind, ParticipantId, StartupFailure};

/// Errors of the compositor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no free RTP/RTCP port pair found when scanning from port {start}")]
    NoAvailablePort { start: u16 },

    #[error("unable to allocate a port pair above {base} after {attempts} attempts")]
    PortExhaustion { base: u16, attempts: u32 },

    #[error("unable to bridge {kind} of participant {participant}: {reason:#}")]
    BridgeSetup {
        participant: ParticipantId,
        kind: MediaKind,
        reason: anyhow::Error,
    },

    #[error("transcoder did not start within {0:?}")]
    StartTimeout(Duration),

    #[error("transcoder failed to start ({kind}): {line}")]
    StartupFailed { kind: StartupFailure, line: String },

    #[error("transcoder exited during startup ({})", display_status(.status))]
    ExitedDuringStartup { status: Option<ExitStatus> },

    #[error("transcoder exited unexpectedly ({})", display_status(.status))]
    UnexpectedExit { status: Option<ExitStatus> },

    #[error("unable to spawn transcoder `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no participant has a bridged stream to compose")]
    NoInputs,

    #[error("orchestrator is not running")]
    OrchestratorClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn display_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "unknown status".to_string(),
    }
}
