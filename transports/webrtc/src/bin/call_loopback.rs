//! Loopback call between two in-process call hooks
//!
//! Mounts an initiating hook (`alice`) and a receiving hook (`bob`) on
//! webrtc-rs peers, relays their `ice-servers` / `peer-message` pushes the
//! way the server would, and prints every DOM event the hooks dispatch.
//!
//! # Usage
//!
//! ```bash
//! # Host candidates only, hang up as soon as both sides are connected
//! cargo run --bin call_loopback
//!
//! # Hand out a STUN server and allow up to a minute to connect
//! cargo run --bin call_loopback -- \
//!   --ice-server stun:stun.l.google.com:19302 \
//!   --hold-secs 60 \
//!   --audio-only
//! ```

use clap::Parser;
use livecall_webrtc::hook::{BroadcastEventSink, DomEvent, Element, HookContext};
use livecall_webrtc::media::{DeviceMediaSource, MediaConstraints};
use livecall_webrtc::signaling::{
    relay_peer_messages, MemoryChannel, PushedEvent, PEER_MESSAGE_EVENT,
};
use livecall_webrtc::{CallConfig, CallEnvironment, CallHook, Hook, IceServer, RtcPeerBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Loopback WebRTC call
///
/// Two call hooks in one process negotiate a call over in-memory signaling.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// ICE server URLs handed out in the ice-servers reply (repeatable)
    #[arg(long = "ice-server", value_delimiter = ',', env = "LIVECALL_ICE_SERVERS")]
    ice_servers: Vec<String>,

    /// Deadline for the ice-servers reply in milliseconds (0 waits forever)
    #[arg(long, default_value_t = 10_000, env = "LIVECALL_ICE_TIMEOUT_MS")]
    ice_timeout_ms: u64,

    /// Seconds to wait for both sides to report connected
    #[arg(long, default_value_t = 30, env = "LIVECALL_HOLD_SECS")]
    hold_secs: u64,

    /// Place a voice-only call
    #[arg(long, default_value_t = false, env = "LIVECALL_AUDIO_ONLY")]
    audio_only: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false, env = "LIVECALL_LOG_JSON")]
    log_json: bool,
}

/// Build the call configuration from CLI arguments
fn build_config_from_args(args: &Args) -> CallConfig {
    let timeout = (args.ice_timeout_ms > 0).then_some(args.ice_timeout_ms);
    let mut config = CallConfig::default().with_ice_servers_timeout_ms(timeout);
    if args.audio_only {
        config = config.with_media(MediaConstraints::audio_only());
    }
    config
}

/// One participant of the loopback call
struct Participant {
    name: &'static str,
    hook: Arc<CallHook>,
    events: broadcast::Receiver<DomEvent>,
}

fn participant(
    name: &'static str,
    mate: &'static str,
    initiator: bool,
    env: &CallEnvironment,
) -> (Participant, mpsc::UnboundedReceiver<PushedEvent>) {
    let el = Element::new("div")
        .with_id(format!("call-{}", name))
        .with_data("initiator", initiator.to_string())
        .with_data("mate", mate)
        .with_data("me", name)
        .with_child(Element::new("video").with_id("local-video"))
        .with_child(Element::new("video").with_id("remote-video"));

    let sink = Arc::new(BroadcastEventSink::default());
    let events = sink.subscribe();
    let (channel, channel_rx) = MemoryChannel::new(name);
    let ctx = HookContext::new(el.into_shared(), Arc::new(channel), sink);

    let participant = Participant {
        name,
        hook: Arc::new(CallHook::new(ctx, env.clone())),
        events,
    };
    (participant, channel_rx)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("\nCtrl+C received, hanging up...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("livecall-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(args.log_json);

    let config = build_config_from_args(&args);
    config.validate()?;

    let ice_servers: Vec<IceServer> = args.ice_servers.iter().map(IceServer::stun).collect();
    for server in &ice_servers {
        server.validate()?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ice_servers = ?args.ice_servers,
        ice_timeout = ?config.ice_servers_timeout(),
        audio_only = args.audio_only,
        hold_secs = args.hold_secs,
        "Loopback call starting"
    );

    let env = CallEnvironment::new(
        config,
        Arc::new(DeviceMediaSource::with_default_devices()),
        Arc::new(RtcPeerBackend::for_loopback()?.with_silence(true)),
    );

    let (mut alice, alice_rx) = participant("alice", "bob", true, &env);
    let (mut bob, bob_rx) = participant("bob", "alice", false, &env);

    // Each relay plays the server for one socket and delivers to the mate
    let relays = [
        spawn_relay(alice.name, alice_rx, Arc::clone(&bob.hook), ice_servers.clone()),
        spawn_relay(bob.name, bob_rx, Arc::clone(&alice.hook), ice_servers),
    ];

    // Bob mounts first so the offer finds a mounted hook
    bob.hook.mounted().await?;
    alice.hook.mounted().await?;

    let connected = wait_for_call(&mut alice, &mut bob, args.hold_secs, &shutdown_flag).await;

    for p in [&alice, &bob] {
        if let Some(session) = p.hook.session() {
            info!(
                participant = p.name,
                state = %session.state().await,
                remote_tracks = session.remote_track_count().await,
                "Hanging up"
            );
        }
    }

    alice.hook.destroyed().await?;
    bob.hook.destroyed().await?;
    drop(alice);
    drop(bob);
    for relay in relays {
        relay.abort();
    }

    if connected {
        println!("Call established and hung up");
        Ok(())
    } else if shutdown_flag.load(Ordering::SeqCst) {
        println!("Interrupted before the call connected");
        Ok(())
    } else {
        Err(format!("call did not connect within {}s", args.hold_secs).into())
    }
}

fn spawn_relay(
    name: &'static str,
    rx: mpsc::UnboundedReceiver<PushedEvent>,
    to: Arc<CallHook>,
    ice_servers: Vec<IceServer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        relay_peer_messages(rx, ice_servers, move |payload| {
            let to = Arc::clone(&to);
            async move { to.handle_event(PEER_MESSAGE_EVENT, payload).await }
        })
        .await;
        info!(participant = name, "Relay finished");
    })
}

/// Print DOM events until both sides are connected, the deadline passes
/// or Ctrl+C is pressed. Returns whether both sides connected.
async fn wait_for_call(
    alice: &mut Participant,
    bob: &mut Participant,
    hold_secs: u64,
    shutdown_flag: &AtomicBool,
) -> bool {
    let deadline = tokio::time::sleep(Duration::from_secs(hold_secs));
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(100));

    let mut alice_connected = false;
    let mut bob_connected = false;

    while !(alice_connected && bob_connected) {
        tokio::select! {
            event = alice.events.recv() => {
                if let Ok(event) = event {
                    alice_connected |= report(alice.name, &event);
                }
            }
            event = bob.events.recv() => {
                if let Ok(event) = event {
                    bob_connected |= report(bob.name, &event);
                }
            }
            _ = &mut deadline => {
                warn!(hold_secs, "Call did not connect in time");
                return false;
            }
            _ = poll.tick() => {
                if shutdown_flag.load(Ordering::SeqCst) {
                    return false;
                }
            }
        }
    }

    info!("Both sides connected");
    true
}

/// Print one DOM event, returning whether it reports `connected`
fn report(name: &str, event: &DomEvent) -> bool {
    println!("[{}] {} {}", name, event.name, event.detail);
    event.detail.get("state").and_then(|s| s.as_str()) == Some("connected")
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
