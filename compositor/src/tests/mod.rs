// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod descriptor;
mod grid;

pub mod testing {

    use crate::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::{
        collections::{BTreeMap, HashSet},
        net::IpAddr,
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Once,
        },
        time::Duration,
    };

    static INIT: Once = Once::new();

    /// initialize for testing
    pub fn init() {
        INIT.call_once(|| {
            // init logger
            env_logger::try_init().ok();
        });
        trace!("init()");
    }

    /// Everything the fake SFU was asked to do
    #[derive(Debug, Default)]
    pub struct FakeState {
        pub transports: Vec<String>,
        pub connects: Vec<(IpAddr, u16, u16)>,
        pub consumes: Vec<String>,
        pub key_frame_requests: usize,
        pub closed_taps: Vec<String>,
        pub closed_transports: Vec<String>,
        /// Let creating transports fail
        pub fail_transport: bool,
        /// Let consuming these producers fail
        pub failing_producers: HashSet<String>,
        /// Producers whose taps come without codecs
        pub codecless_producers: HashSet<String>,
    }

    /// SFU stand-in recording all calls.
    ///
    /// Producers named `audio*` are Opus, all others VP8.
    #[derive(Debug, Clone, Default)]
    pub struct FakeRouter {
        pub state: Arc<Mutex<FakeState>>,
    }

    impl FakeRouter {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn fail_producer(&self, producer_id: &str) {
            self.state
                .lock()
                .failing_producers
                .insert(producer_id.to_string());
        }
    }

    #[async_trait]
    impl MediaRouter for FakeRouter {
        async fn create_bridge_transport(
            &self,
            listen_ip: IpAddr,
        ) -> anyhow::Result<Arc<dyn BridgeTransport>> {
            let mut state = self.state.lock();
            if state.fail_transport {
                anyhow::bail!("transport creation refused");
            }
            let id = format!("transport-{}", state.transports.len());
            state.transports.push(id.clone());
            Ok(Arc::new(FakeTransport {
                id,
                local_ip: listen_ip,
                state: self.state.clone(),
            }))
        }
    }

    #[derive(Debug)]
    pub struct FakeTransport {
        id: String,
        local_ip: IpAddr,
        state: Arc<Mutex<FakeState>>,
    }

    #[async_trait]
    impl BridgeTransport for FakeTransport {
        fn id(&self) -> &str {
            &self.id
        }

        fn local_ip(&self) -> IpAddr {
            self.local_ip
        }

        async fn connect(&self, ip: IpAddr, rtp_port: u16, rtcp_port: u16) -> anyhow::Result<()> {
            self.state.lock().connects.push((ip, rtp_port, rtcp_port));
            Ok(())
        }

        async fn consume(
            &self,
            producer_id: &str,
            paused: bool,
        ) -> anyhow::Result<Arc<dyn MediaTap>> {
            assert!(!paused, "taps must be created unpaused");
            let mut state = self.state.lock();
            if state.failing_producers.contains(producer_id) {
                anyhow::bail!("unknown producer {producer_id}");
            }
            state.consumes.push(producer_id.to_string());

            let kind = if producer_id.starts_with("audio") {
                MediaKind::Audio
            } else {
                MediaKind::Video
            };
            let codecs = if state.codecless_producers.contains(producer_id) {
                vec![]
            } else {
                vec![codec(kind)]
            };
            Ok(Arc::new(FakeTap {
                id: format!("tap-{producer_id}"),
                kind,
                codecs,
                closed: AtomicBool::new(false),
                state: self.state.clone(),
            }))
        }

        async fn close(&self) {
            self.state.lock().closed_transports.push(self.id.clone());
        }
    }

    #[derive(Debug)]
    pub struct FakeTap {
        id: String,
        kind: MediaKind,
        codecs: Vec<CodecParameters>,
        closed: AtomicBool,
        state: Arc<Mutex<FakeState>>,
    }

    #[async_trait]
    impl MediaTap for FakeTap {
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
            self.closed.load(Ordering::SeqCst)
        }

        async fn request_key_frame(&self) -> anyhow::Result<()> {
            self.state.lock().key_frame_requests += 1;
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.state.lock().closed_taps.push(self.id.clone());
        }
    }

    /// The codec the fake SFU negotiates for `kind`
    pub fn codec(kind: MediaKind) -> CodecParameters {
        match kind {
            MediaKind::Audio => CodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 100,
                clock_rate: 48000,
                channels: Some(2),
                parameters: BTreeMap::from([("useinbandfec".to_string(), "1".to_string())]),
            },
            MediaKind::Video => CodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 101,
                clock_rate: 90000,
                channels: None,
                parameters: BTreeMap::new(),
            },
        }
    }

    /// Port allocator which does not wait between attempts
    pub fn port_allocator() -> PortAllocator {
        PortAllocator::new(PortParameters {
            retry_delay: Duration::ZERO,
            ..PortParameters::default()
        })
    }

    /// Bridge parameters writing into `dir` with port bases above `base`
    pub fn bridge_parameters(dir: &Path, base: u16) -> BridgeParameters {
        BridgeParameters {
            descriptor_dir: dir.to_path_buf(),
            video_port_base: base,
            audio_port_base: base + 1000,
            ..BridgeParameters::default()
        }
    }

    /// Transcoder parameters running the shell `script` instead of a transcoder.
    ///
    /// The generated arguments end up as positional parameters of the script.
    pub fn fake_transcoder(script: &str, output_dir: &Path) -> TranscoderParameters {
        TranscoderParameters {
            program: "sh".to_string(),
            prefix_args: vec![
                "-c".to_string(),
                script.to_string(),
                "fake-transcoder".to_string(),
            ],
            output_dir: output_dir.to_path_buf(),
            startup_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(2),
            ..TranscoderParameters::default()
        }
    }

    /// Script which starts like the transcoder and keeps running
    pub const RUNNING: &str = "echo \"Output #0, hls, to 'playlist.m3u8':\" >&2; exec sleep 30";

    /// Script which never reports anything
    pub const SILENT: &str = "exec sleep 30";

    /// wait the given amount of milliseconds
    pub async fn wait_millis(milliseconds: u64) {
        info!("-- waiting {milliseconds} millisecond(s) --");
        tokio::time::sleep(Duration::from_millis(milliseconds)).await;
    }
}
