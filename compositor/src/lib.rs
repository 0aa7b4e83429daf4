// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

/*!
    # Purpose
    The *compositor* crate composes the media of several call participants into a single
    [HLS](https://en.wikipedia.org/wiki/HTTP_Live_Streaming) output by driving an external
    transcoder process ([FFmpeg](https://ffmpeg.org/)).

    Every published audio or video stream of a participant is *bridged* out of the SFU into a
    pair of local UDP ports. The transcoder ingests each bridged stream through a small session
    descriptor file and mixes all of them into one grid picture plus one audio mix.

    - [StreamOrchestrator]
      tracks the participants, debounces membership changes and restarts the transcoder.
    - [CompositorSupervisor]
      owns the transcoder process, classifies its startup output and terminates it.
    - [MediaBridge]
      opens media taps on the SFU and writes the session descriptors.
    - [PortAllocator]
      hands out RTP/RTCP port pairs which are verified to be free.

    # SFU access

    The crate does not talk to any SFU itself. Instead the following traits are expected.

    - [MediaRouter]
      creates bridge transports.
    - [BridgeTransport]
      sends the media of a tap to a local address.
    - [MediaTap]
      a receive side consumer of one published stream.

    # Layouts

    - [Grid]
      shows all participants in an evenly divided grid.

    # Transcoder command line

    - [TranscoderParameters]
      holds all transcoder settings and builds the command line.
    - [video_filter] and [audio_filter]
      build the filter graph clauses.
    - [classify]
      matches a line of the transcoder diagnostics against the known signatures.
*/

#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

mod bridge;
mod descriptor;
mod error;
mod filter;
pub mod layout;
mod media;
mod orchestrator;
mod ports;
mod signature;
mod supervisor;
mod transcoder;

#[cfg(test)]
mod tests;

pub use bridge::*;
pub use descriptor::*;
pub use error::*;
pub use filter::*;
pub use layout::*;
pub use media::*;
pub use orchestrator::*;
pub use ports::*;
pub use signature::*;
pub use supervisor::*;
pub use transcoder::*;

#[cfg(test)]
pub use tests::testing;
