// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::{Size, View};

/// Output label of the video part of the filter graph
pub const VIDEO_OUTPUT: &str = "mixed_video";
/// Output label of the audio part of the filter graph
pub const AUDIO_OUTPUT: &str = "mixed_audio";

/// Duration in seconds of the black picture shown if nobody sends video
pub const FILLER_DURATION: u32 = 10;

const SAMPLE_RATE: u32 = 44100;

/// A video input of the transcoder and where to show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInput {
    /// Index of the transcoder input
    pub index: usize,
    pub view: View,
}

/// Build the video part of the filter graph.
///
/// A single input fills the whole canvas. Multiple inputs are scaled into their views and
/// overlayed one after another onto a black base.
#[must_use]
pub fn video_filter(inputs: &[VideoInput], canvas: Size, framerate: u32) -> String {
    let (width, height) = (canvas.width, canvas.height);
    match inputs {
        [] => format!(
            "color=black:size={canvas}:rate={framerate}:duration={FILLER_DURATION}[{VIDEO_OUTPUT}]"
        ),
        [input] => format!("[{}:v]scale={width}:{height}[{VIDEO_OUTPUT}]", input.index),
        inputs => {
            let mut clauses: Vec<String> = inputs
                .iter()
                .enumerate()
                .map(|(n, input)| {
                    format!(
                        "[{}:v]scale={}:{}[scaled{n}]",
                        input.index, input.view.size.width, input.view.size.height
                    )
                })
                .collect();

            clauses.push(format!("color=black:size={canvas}:rate={framerate}[base]"));

            let mut previous = "base".to_string();
            for (n, input) in inputs.iter().enumerate() {
                let output = if n + 1 == inputs.len() {
                    VIDEO_OUTPUT.to_string()
                } else {
                    format!("layer_{n}")
                };
                clauses.push(format!(
                    "[{previous}][scaled{n}]overlay={}:{}[{output}]",
                    input.view.pos.x, input.view.pos.y
                ));
                previous = output;
            }

            clauses.join(";")
        }
    }
}

/// Build the audio part of the filter graph from the transcoder input indices.
#[must_use]
pub fn audio_filter(inputs: &[usize]) -> String {
    match inputs {
        [] => format!("anullsrc=channel_layout=stereo:sample_rate={SAMPLE_RATE}[{AUDIO_OUTPUT}]"),
        [index] => format!(
            "[{index}:a]aformat=sample_rates={SAMPLE_RATE}:channel_layouts=stereo[{AUDIO_OUTPUT}]"
        ),
        inputs => {
            let labels: String = inputs.iter().map(|index| format!("[{index}:a]")).collect();
            format!(
                "{labels}amix=inputs={}:duration=longest[{AUDIO_OUTPUT}]",
                inputs.len()
            )
        }
    }
}
