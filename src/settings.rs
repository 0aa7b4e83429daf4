// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use compositor::{
    BridgeParameters, OrchestratorParameters, PortParameters, Size, TranscoderParameters,
};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub signaling: SignalingSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub ports: PortSettings,
    #[serde(default)]
    pub transcoder: TranscoderSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
}

impl Settings {
    pub fn load(file_name: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(file_name, FileFormat::Toml))
            .add_source(Environment::with_prefix("OPENTALK_HLS").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Deserialize)]
pub struct SignalingSettings {
    /// Websocket of the media server
    pub url: String,
    /// Time the media server gets to answer a bridge request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl SignalingSettings {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub listen_ip: IpAddr,
    pub descriptor_dir: PathBuf,
    pub video_port_base: u16,
    pub audio_port_base: u16,
    pub key_frame_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            descriptor_dir: PathBuf::from("./hls_output"),
            video_port_base: 20000,
            audio_port_base: 21000,
            key_frame_interval_ms: 2000,
        }
    }
}

impl From<&BridgeSettings> for BridgeParameters {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            listen_ip: settings.listen_ip,
            descriptor_dir: settings.descriptor_dir.clone(),
            video_port_base: settings.video_port_base,
            audio_port_base: settings.audio_port_base,
            key_frame_interval: Duration::from_millis(settings.key_frame_interval_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub attempts: u32,
    pub probe_limit: u32,
    pub retry_delay_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            probe_limit: 100,
            retry_delay_ms: 1000,
        }
    }
}

impl From<&PortSettings> for PortParameters {
    fn from(settings: &PortSettings) -> Self {
        Self {
            attempts: settings.attempts,
            probe_limit: settings.probe_limit,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TranscoderSettings {
    pub program: String,
    /// e.g. `["nice", "-n", "10"]`, the program is appended to these
    pub wrapper: Vec<String>,
    pub output_dir: PathBuf,
    pub resolution: Size,
    pub framerate: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub segment_duration: u32,
    pub playlist_size: u32,
    pub startup_timeout_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        let params = TranscoderParameters::default();
        Self {
            program: params.program,
            wrapper: vec![],
            output_dir: params.output_dir,
            resolution: params.canvas,
            framerate: params.framerate,
            video_bitrate: params.video_bitrate,
            audio_bitrate: params.audio_bitrate,
            segment_duration: params.segment_duration,
            playlist_size: params.playlist_size,
            startup_timeout_ms: 15_000,
            stop_grace_ms: 5_000,
        }
    }
}

impl From<&TranscoderSettings> for TranscoderParameters {
    fn from(settings: &TranscoderSettings) -> Self {
        let (program, prefix_args) = match settings.wrapper.split_first() {
            Some((wrapper, args)) => {
                let mut args = args.to_vec();
                args.push(settings.program.clone());
                (wrapper.clone(), args)
            }
            None => (settings.program.clone(), vec![]),
        };
        Self {
            program,
            prefix_args,
            output_dir: settings.output_dir.clone(),
            canvas: settings.resolution,
            framerate: settings.framerate,
            video_bitrate: settings.video_bitrate.clone(),
            audio_bitrate: settings.audio_bitrate.clone(),
            segment_duration: settings.segment_duration,
            playlist_size: settings.playlist_size,
            startup_timeout: Duration::from_millis(settings.startup_timeout_ms),
            stop_grace: Duration::from_millis(settings.stop_grace_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub debounce_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            settle_delay_ms: 3_000,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn orchestrator_parameters(&self) -> OrchestratorParameters {
        OrchestratorParameters {
            debounce: Duration::from_millis(self.orchestrator.debounce_ms),
            settle_delay: Duration::from_millis(self.orchestrator.settle_delay_ms),
            canvas: self.transcoder.resolution,
        }
    }
}
