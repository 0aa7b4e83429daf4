// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use std::{path::PathBuf, time::Duration};

use crate::{
    audio_filter, video_filter, Error, ParticipantId, Result, Size, VideoInput, View,
    AUDIO_OUTPUT, VIDEO_OUTPUT,
};

/// Bridged streams of one participant to compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionInput {
    pub participant: ParticipantId,
    /// Where to show the participant's video
    pub view: View,
    /// Descriptor of the video stream
    pub video: Option<PathBuf>,
    /// Descriptor of the audio stream
    pub audio: Option<PathBuf>,
}

impl CompositionInput {
    /// Descriptor of the video stream if it was written.
    #[must_use]
    pub fn ready_video(&self) -> Option<&PathBuf> {
        self.video.as_ref().filter(|path| path.exists())
    }

    /// Descriptor of the audio stream if it was written.
    #[must_use]
    pub fn ready_audio(&self) -> Option<&PathBuf> {
        self.audio.as_ref().filter(|path| path.exists())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_video().is_some() || self.ready_audio().is_some()
    }
}

/// Transcoder settings.
#[derive(Debug, Clone)]
pub struct TranscoderParameters {
    /// Executable to start
    pub program: String,
    /// Arguments put in front of the generated ones
    pub prefix_args: Vec<String>,
    /// Directory of the playlist and its segments
    pub output_dir: PathBuf,
    /// File name of the playlist
    pub playlist: String,
    /// Resolution of the composed picture
    pub canvas: Size,
    /// Frames per second
    pub framerate: u32,
    /// Video bitrate, e.g. `2000k`
    pub video_bitrate: String,
    /// Audio bitrate, e.g. `128k`
    pub audio_bitrate: String,
    /// Segment duration in seconds
    pub segment_duration: u32,
    /// Number of segments in the playlist
    pub playlist_size: u32,
    /// Time the transcoder gets to report a successful start
    pub startup_timeout: Duration,
    /// Time between the termination request and killing the transcoder
    pub stop_grace: Duration,
}

impl Default for TranscoderParameters {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            prefix_args: vec![],
            output_dir: PathBuf::from("./hls_output"),
            playlist: "playlist.m3u8".to_string(),
            canvas: Size::FHD,
            framerate: 30,
            video_bitrate: "2000k".to_string(),
            audio_bitrate: "128k".to_string(),
            segment_duration: 4,
            playlist_size: 10,
            startup_timeout: Duration::from_secs(15),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl TranscoderParameters {
    #[must_use]
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(&self.playlist)
    }

    /// Build the transcoder arguments (without [`Self::prefix_args`]) for all ready inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoInputs`] if no input is ready.
    pub fn command_line(&self, inputs: &[CompositionInput]) -> Result<Vec<String>> {
        let mut args: Vec<String> = ["-nostdin", "-nostats", "-y"].map(String::from).into();

        let mut video = vec![];
        let mut audio = vec![];
        let mut index = 0;
        for input in inputs {
            if let Some(path) = input.ready_video() {
                push_input(&mut args, path);
                video.push(VideoInput {
                    index,
                    view: input.view.clone(),
                });
                index += 1;
            }
            if let Some(path) = input.ready_audio() {
                push_input(&mut args, path);
                audio.push(index);
                index += 1;
            }
        }
        if index == 0 {
            return Err(Error::NoInputs);
        }

        let graph = [
            video_filter(&video, self.canvas, self.framerate),
            audio_filter(&audio),
        ]
        .join(";");

        let gop = self.framerate * 2;
        let bufsize = double_bitrate(&self.video_bitrate);
        let mut flags = vec![
            "delete_segments",
            "independent_segments",
            "omit_endlist",
            "round_durations",
            "discont_start",
        ];
        if self.playlist_path().exists() {
            flags.push("append_list");
        }
        let segments = self.output_dir.join("segment_%03d.ts");
        let segments = segments.to_string_lossy();
        let playlist = self.playlist_path();
        let playlist = playlist.to_string_lossy();
        let video_map = format!("[{VIDEO_OUTPUT}]");
        let audio_map = format!("[{AUDIO_OUTPUT}]");
        let framerate = self.framerate.to_string();
        let gop = gop.to_string();
        let segment_duration = self.segment_duration.to_string();
        let playlist_size = self.playlist_size.to_string();
        let flags = flags.join("+");

        args.extend(
            [
                "-filter_complex",
                graph.as_str(),
                "-map",
                video_map.as_str(),
                "-map",
                audio_map.as_str(),
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-tune",
                "zerolatency",
                "-profile:v",
                "baseline",
                "-level",
                "3.0",
                "-pix_fmt",
                "yuv420p",
                "-r",
                framerate.as_str(),
                "-b:v",
                self.video_bitrate.as_str(),
                "-maxrate",
                self.video_bitrate.as_str(),
                "-bufsize",
                bufsize.as_str(),
                "-keyint_min",
                framerate.as_str(),
                "-g",
                gop.as_str(),
                "-sc_threshold",
                "0",
                "-c:a",
                "aac",
                "-b:a",
                self.audio_bitrate.as_str(),
                "-ar",
                "44100",
                "-ac",
                "2",
                "-f",
                "hls",
                "-hls_time",
                segment_duration.as_str(),
                "-hls_list_size",
                playlist_size.as_str(),
                "-hls_flags",
                flags.as_str(),
                "-hls_segment_filename",
                &*segments,
                "-hls_allow_cache",
                "0",
                &*playlist,
            ]
            .map(String::from),
        );

        Ok(args)
    }
}

fn push_input(args: &mut Vec<String>, path: &std::path::Path) {
    args.extend(
        [
            "-use_wallclock_as_timestamps",
            "1",
            "-protocol_whitelist",
            "file,rtp,udp",
            "-i",
            &*path.to_string_lossy(),
        ]
        .map(String::from),
    );
}

/// Double a bitrate like `2000k`, unparsable values are kept.
fn double_bitrate(bitrate: &str) -> String {
    let digits = bitrate.trim_end_matches(|c: char| !c.is_ascii_digit());
    match digits.parse::<u64>().ok().and_then(|value| value.checked_mul(2)) {
        Some(doubled) => format!("{doubled}{}", &bitrate[digits.len()..]),
        None => bitrate.to_string(),
    }
}
