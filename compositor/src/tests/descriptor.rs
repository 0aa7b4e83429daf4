// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use crate::*;
use pretty_assertions::assert_eq;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn descriptor(kind: MediaKind) -> SessionDescriptor {
    SessionDescriptor {
        session_name: "opentalk-hls".to_string(),
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        kind,
        ports: PortPair {
            rtp: 20000,
            rtcp: 20001,
        },
        codec: testing::codec(kind),
    }
}

#[test]
fn video_descriptor() {
    assert_eq!(
        descriptor(MediaKind::Video).to_string(),
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s=opentalk-hls\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m=video 20000 RTP/AVP 101\r\n\
         a=rtcp:20001\r\n\
         a=rtpmap:101 VP8/90000\r\n\
         a=recvonly\r\n"
    );
}

#[test]
fn audio_descriptor() {
    assert_eq!(
        descriptor(MediaKind::Audio).to_string(),
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s=opentalk-hls\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m=audio 20000 RTP/AVP 100\r\n\
         a=rtcp:20001\r\n\
         a=rtpmap:100 opus/48000/2\r\n\
         a=fmtp:100 useinbandfec=1\r\n\
         a=recvonly\r\n"
    );
}

#[test]
fn mono_audio_and_ipv6() {
    let mut descriptor = descriptor(MediaKind::Audio);
    descriptor.address = IpAddr::V6(Ipv6Addr::LOCALHOST);
    descriptor.codec.channels = None;
    descriptor.codec.parameters.insert("minptime".to_string(), "10".to_string());

    let text = descriptor.to_string();
    assert!(text.contains("c=IN IP6 ::1\r\n"));
    assert!(text.contains("a=rtpmap:100 opus/48000/1\r\n"));
    assert!(text.contains("a=fmtp:100 minptime=10;useinbandfec=1\r\n"));
}

#[tokio::test]
async fn written_atomically() {
    testing::init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("alice_video.sdp");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "old content").unwrap();

    let descriptor = descriptor(MediaKind::Video);
    descriptor.write(&path).await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), descriptor.to_string());
    let files = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(files, 1, "temporary file left behind");
}
