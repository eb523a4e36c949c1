//! WebRTC loopback end-to-end test
//!
//! Two call hooks on real webrtc-rs peers negotiate over in-memory signaling
//! and exchange media on the local host.
//!
//! # Running Tests
//!
//! ```bash
//! # Opens UDP sockets, so it is not part of the default run
//! cargo test --test loopback_test -- --ignored --nocapture
//! ```

mod harness;

use harness::init_logging;
use livecall_webrtc::hook::{BroadcastEventSink, DomEvent, Element, HookContext};
use livecall_webrtc::media::DeviceMediaSource;
use livecall_webrtc::signaling::{relay_peer_messages, MemoryChannel, PEER_MESSAGE_EVENT};
use livecall_webrtc::{
    CallConfig, CallEnvironment, CallHook, Hook, RtcPeerBackend, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

fn call_element(me: &str, mate: &str, initiator: bool) -> Element {
    Element::new("div")
        .with_id(format!("call-{}", me))
        .with_data("initiator", initiator.to_string())
        .with_data("mate", mate)
        .with_data("me", me)
        .with_child(Element::new("video").with_id("local-video"))
        .with_child(Element::new("video").with_id("remote-video"))
}

async fn wait_connected(rx: &mut broadcast::Receiver<DomEvent>) {
    loop {
        let event = rx.recv().await.unwrap();
        info!(target = ?event.target, detail = %event.detail, "DOM event");
        if event.detail["state"] == "connected" {
            return;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "opens UDP sockets on the local host"]
async fn test_loopback_call_connects_and_receives_media() {
    init_logging();

    let env = CallEnvironment::new(
        CallConfig::audio_only(),
        Arc::new(DeviceMediaSource::with_default_devices()),
        Arc::new(RtcPeerBackend::for_loopback().unwrap().with_silence(true)),
    );

    let sink_a = Arc::new(BroadcastEventSink::default());
    let sink_b = Arc::new(BroadcastEventSink::default());
    let mut dom_a = sink_a.subscribe();
    let mut dom_b = sink_b.subscribe();

    let (channel_a, rx_a) = MemoryChannel::new("alice");
    let (channel_b, rx_b) = MemoryChannel::new("bob");

    let alice = Arc::new(CallHook::new(
        HookContext::new(
            call_element("alice", "bob", true).into_shared(),
            Arc::new(channel_a),
            sink_a,
        ),
        env.clone(),
    ));
    let bob = Arc::new(CallHook::new(
        HookContext::new(
            call_element("bob", "alice", false).into_shared(),
            Arc::new(channel_b),
            sink_b,
        ),
        env,
    ));

    let to_bob = Arc::clone(&bob);
    let relay_a = tokio::spawn(relay_peer_messages(rx_a, vec![], move |payload| {
        let to_bob = Arc::clone(&to_bob);
        async move { to_bob.handle_event(PEER_MESSAGE_EVENT, payload).await }
    }));
    let to_alice = Arc::clone(&alice);
    let relay_b = tokio::spawn(relay_peer_messages(rx_b, vec![], move |payload| {
        let to_alice = Arc::clone(&to_alice);
        async move { to_alice.handle_event(PEER_MESSAGE_EVENT, payload).await }
    }));

    bob.mounted().await.unwrap();
    alice.mounted().await.unwrap();

    tokio::time::timeout(Duration::from_secs(20), async {
        wait_connected(&mut dom_a).await;
        wait_connected(&mut dom_b).await;
    })
    .await
    .expect("both peers connect");

    // Silence frames make the remote audio track show up on both sides
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let a = alice.session().unwrap().remote_track_count().await;
            let b = bob.session().unwrap().remote_track_count().await;
            if a > 0 && b > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("remote media arrives");

    assert_eq!(alice.session().unwrap().state().await, SessionState::Active);
    assert_eq!(bob.session().unwrap().state().await, SessionState::Active);

    alice.destroyed().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while bob.session().unwrap().has_peer().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("hang up reaches the mate");

    assert_eq!(bob.session().unwrap().remote_track_count().await, 0);

    bob.destroyed().await.unwrap();
    relay_a.abort();
    relay_b.abort();
}
