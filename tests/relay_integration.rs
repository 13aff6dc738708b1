//! End-to-end relay test
//!
//! Runs the control API and two in-process sinks, feeds a local stream
//! through the source hub and checks what each sink receives.

use std::sync::Arc;
use std::time::Duration;

use axum::{body::Bytes as Body, extract::Path, routing::post, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use media_relay::media::{AudioSpecificConfig, AvcConfig, CodecData, Packet};
use media_relay::{api, Config, Relay};

// High profile, level 3.1
const AVC_RECORD: &[u8] = &[
    0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x03,
    0x68, 0xEF, 0x38,
];
// AAC-LC, 44.1kHz, stereo
const AAC_CONFIG: &[u8] = &[0x12, 0x10];

type Received = Arc<Mutex<Vec<(String, String, Vec<u8>)>>>;

/// Sink accepting pushes on `/{sink}/{stream}`
async fn spawn_sinks() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&received);
    let app = Router::new().route(
        "/{sink}/{stream}",
        post(move |Path((sink, stream)): Path<(String, String)>, body: Body| {
            let store = Arc::clone(&store);
            async move {
                store.lock().push((sink, stream, body.to_vec()));
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{}", addr), received)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn payloads_for(received: &Received, sink: &str) -> Vec<Vec<u8>> {
    received
        .lock()
        .iter()
        .filter(|(s, stream, _)| s == sink && stream == "cam1")
        .map(|(_, _, body)| body.clone())
        .collect()
}

fn gop(start: u8) -> Vec<Packet> {
    let ms = Duration::from_millis;
    let idr = Bytes::from(vec![0, 0, 0, 2, 0x65, start]);
    let slice = Bytes::from(vec![0, 0, 0, 2, 0x41, start]);
    vec![
        Packet::video(0, true, ms(40), idr),
        Packet::audio(1, ms(23), Bytes::from_static(&[0x21, 0x00])),
        Packet::video(0, false, ms(40), slice),
        Packet::audio(1, ms(23), Bytes::from_static(&[0x21, 0x00])),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relay_to_two_sinks() {
    let (sinks, received) = spawn_sinks().await;
    let sink_a = format!("{}/a", sinks);
    let sink_b = format!("{}/b", sinks);

    let config = Config::default().local_stream("cam1").local_stream("cam2");
    let (relay, hub) = Relay::from_config(&config).unwrap();

    hub.set_codecs(
        "cam1",
        vec![
            CodecData::H264(AvcConfig::parse(Bytes::from_static(AVC_RECORD)).unwrap()),
            CodecData::Aac(AudioSpecificConfig::parse(Bytes::from_static(AAC_CONFIG)).unwrap()),
        ],
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_url = format!("http://{}/api/streams", listener.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(api::serve(listener, relay.clone(), async {
        shutdown_rx.await.ok();
    }));

    let client = reqwest::Client::new();
    let streams: Vec<String> = client
        .get(&api_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(streams, vec!["cam1", "cam2"]);

    for sink in [&sink_a, &sink_b] {
        let response = client
            .post(format!("{}/cam1/connect", api_url))
            .json(&serde_json::json!({ "URL": sink }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    // Both tasks have pushed metadata and init segment once subscribed
    wait_until("subscribers", || hub.subscriber_count("cam1") == 2).await;
    wait_until("init segments", || {
        payloads_for(&received, "a").len() == 2 && payloads_for(&received, "b").len() == 2
    })
    .await;

    // Two GOPs and the keyframe that closes the second one
    for packet in gop(1).into_iter().chain(gop(2)) {
        hub.publish("cam1", packet);
    }
    hub.publish("cam1", gop(3).remove(0));

    wait_until("fragments", || {
        payloads_for(&received, "a").len() == 4 && payloads_for(&received, "b").len() == 4
    })
    .await;

    for sink in ["a", "b"] {
        let payloads = payloads_for(&received, sink);

        assert_eq!(payloads[0][0], 0x09);
        let metadata = String::from_utf8(payloads[0][1..].to_vec()).unwrap();
        assert_eq!(metadata, r#"video/x-flv; codecs="avc1.64001f,mp4a.40.2""#);

        assert_eq!(&payloads[1][..3], b"FLV");

        // Each fragment starts with a video keyframe tag
        for fragment in &payloads[2..] {
            assert_eq!(fragment[0], 9);
            assert_eq!(fragment[11], 0x17);
        }
    }

    // Detaching sink a leaves sink b attached
    let response = client
        .post(format!("{}/cam1/disconnect", api_url))
        .json(&serde_json::json!({ "URL": sink_a }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(relay.registry().sinks("cam1"), vec![sink_b.clone()]);

    // Task a sees the detach on the next packet and unsubscribes
    hub.publish("cam1", gop(4).remove(0));
    wait_until("task a to stop", || hub.subscriber_count("cam1") == 1).await;
    wait_until("fragment for b", || payloads_for(&received, "b").len() == 5).await;
    assert_eq!(payloads_for(&received, "a").len(), 4);

    // Unknown stream
    let response = client
        .post(format!("{}/cam9/connect", api_url))
        .json(&serde_json::json!({ "URL": sink_a }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    drop(client);
    shutdown_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
