// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod common;

#[cfg(test)]
mod tests {

    use crate::common;
    use compositor::{BridgeTransport, MediaKind, MediaRouter, MediaTap};
    use opentalk_hls_streamer::{
        sfu::RemoteRouter,
        signaling::{
            incoming::Response,
            outgoing::{BridgeAction, BridgeRequest},
        },
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Arc,
        time::Duration,
    };
    use tokio::sync::{mpsc, Mutex};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Answers bridge requests like a media server and records them
    fn spawn_media_server(
        router: RemoteRouter,
        mut requests: mpsc::Receiver<BridgeRequest>,
    ) -> Arc<Mutex<Vec<BridgeAction>>> {
        let seen = Arc::new(Mutex::new(vec![]));
        tokio::spawn({
            let seen = seen.clone();
            async move {
                while let Some(request) = requests.recv().await {
                    let (result, error) = match &request.action {
                        BridgeAction::CreateTransport { .. } => (
                            Some(json!({"transport_id": "t-1", "local_ip": "127.0.0.1"})),
                            None,
                        ),
                        BridgeAction::Consume { producer_id, .. } if producer_id == "gone" => {
                            (None, Some("producer not found".to_string()))
                        }
                        BridgeAction::Consume { .. } => (
                            Some(json!({
                                "tap_id": "tap-1",
                                "kind": "audio",
                                "codecs": [{
                                    "mime_type": "audio/opus",
                                    "payload_type": 100,
                                    "clock_rate": 48000,
                                    "channels": 2,
                                    "parameters": {"useinbandfec": 1, "profile": "x"}
                                }]
                            })),
                            None,
                        ),
                        BridgeAction::RequestKeyFrame { .. } => {
                            // never answered
                            seen.lock().await.push(request.action.clone());
                            continue;
                        }
                        _ => (None, None),
                    };
                    seen.lock().await.push(request.action.clone());
                    router.resolve(Response {
                        id: request.id,
                        result,
                        error,
                    });
                }
            }
        });
        seen
    }

    #[tokio::test]
    async fn bridge_calls_are_forwarded() {
        common::init();

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let router = RemoteRouter::new(requests_tx, Duration::from_secs(5));
        let seen = spawn_media_server(router.clone(), requests_rx);

        let transport = router.create_bridge_transport(LOCALHOST).await.unwrap();
        assert_eq!(transport.id(), "t-1");
        assert_eq!(transport.local_ip(), LOCALHOST);

        transport.connect(LOCALHOST, 20000, 20001).await.unwrap();
        let tap = transport.consume("p-1", false).await.unwrap();
        assert_eq!(tap.kind(), MediaKind::Audio);
        let codec = &tap.codecs()[0];
        assert_eq!(codec.encoding_name(), "opus");
        assert_eq!(codec.channels, Some(2));
        assert_eq!(codec.parameters["useinbandfec"], "1");
        assert_eq!(codec.parameters["profile"], "x");

        tap.close().await;
        assert!(tap.is_closed());
        // closing twice does not send another request
        tap.close().await;
        transport.close().await;

        assert_eq!(
            *seen.lock().await,
            vec![
                BridgeAction::CreateTransport {
                    listen_ip: LOCALHOST
                },
                BridgeAction::Connect {
                    transport_id: "t-1".to_string(),
                    ip: LOCALHOST,
                    rtp_port: 20000,
                    rtcp_port: 20001,
                },
                BridgeAction::Consume {
                    transport_id: "t-1".to_string(),
                    producer_id: "p-1".to_string(),
                    paused: false,
                },
                BridgeAction::CloseTap {
                    tap_id: "tap-1".to_string()
                },
                BridgeAction::CloseTransport {
                    transport_id: "t-1".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn refused_and_unanswered_requests_fail() {
        common::init();

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let router = RemoteRouter::new(requests_tx, Duration::from_millis(200));
        spawn_media_server(router.clone(), requests_rx);

        let transport = router.create_bridge_transport(LOCALHOST).await.unwrap();

        let error = transport.consume("gone", false).await.unwrap_err();
        assert!(format!("{error:#}").contains("producer not found"), "{error:#}");

        let tap = transport.consume("p-1", false).await.unwrap();
        let error = tap.request_key_frame().await.unwrap_err();
        assert!(error.to_string().contains("timed out"), "{error:#}");
    }

    #[tokio::test]
    async fn media_server_closing_a_tap() {
        common::init();

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let router = RemoteRouter::new(requests_tx, Duration::from_secs(5));
        spawn_media_server(router.clone(), requests_rx);

        let transport = router.create_bridge_transport(LOCALHOST).await.unwrap();
        let tap = transport.consume("p-1", false).await.unwrap();
        assert!(!tap.is_closed());

        router.tap_closed("tap-1");
        assert!(tap.is_closed());
    }

    #[tokio::test]
    async fn closed_taps_are_forgotten() {
        common::init();

        let (requests_tx, requests_rx) = mpsc::channel(16);
        let router = RemoteRouter::new(requests_tx, Duration::from_secs(5));
        let seen = spawn_media_server(router.clone(), requests_rx);

        let transport = router.create_bridge_transport(LOCALHOST).await.unwrap();
        let tap = transport.consume("p-1", false).await.unwrap();
        assert_eq!(router.open_taps(), 1);
        tap.close().await;
        assert_eq!(router.open_taps(), 0);

        let tap = transport.consume("p-1", false).await.unwrap();
        router.tap_closed("tap-1");
        router.tap_closed("tap-unknown");
        assert!(tap.is_closed());
        assert_eq!(router.open_taps(), 1);
        tap.close().await;
        assert!(tap.is_closed());
        assert_eq!(router.open_taps(), 0);

        // only the first tap had to be closed by request
        let close_requests = seen
            .lock()
            .await
            .iter()
            .filter(|action| matches!(action, BridgeAction::CloseTap { .. }))
            .count();
        assert_eq!(close_requests, 1);
    }

    #[tokio::test]
    async fn lost_connection_fails_pending_requests() {
        common::init();

        let (requests_tx, mut requests_rx) = mpsc::channel(16);
        let router = RemoteRouter::new(requests_tx, Duration::from_secs(30));

        let pending = tokio::spawn({
            let router = router.clone();
            async move { router.create_bridge_transport(LOCALHOST).await }
        });
        // wait until the request was sent
        requests_rx.recv().await.unwrap();
        router.fail_pending("signaling connection closed");

        let result = pending.await.unwrap();
        let error = result.unwrap_err();
        assert!(format!("{error:#}").contains("signaling connection closed"));
    }
}
