//! In-process demo: three windows on one hub, two of them negotiating
//!
//! Registers "console", "Sender" and "Receiver" on a loopback hub, opens a
//! session between Sender and Receiver backed by webrtc-rs, streams Opus
//! silence from Sender, then closes Receiver's window and waits for Sender
//! to observe `peer-left`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin window_rtc_loopback
//!
//! # With a STUN server and JSON logs
//! RUST_LOG=window_rtc=debug cargo run --bin window_rtc_loopback -- \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --log-json
//! ```

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use window_rtc::engine::webrtc::{RtcLocalTrack, WebRtcEngineFactory};
use window_rtc::transport::loopback::LoopbackHost;
use window_rtc::{
    Channel, Endpoint, EventKind, HubClient, MediaStream, MediaTrack, PeerSession,
    SessionEventData, Transport, WindowHub, WindowRtcConfig,
};

/// WindowRTC loopback demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "WINDOW_RTC_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "WINDOW_RTC_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Hub request timeout in milliseconds
    #[arg(long, default_value_t = 5000, env = "WINDOW_RTC_INVOKE_TIMEOUT_MS")]
    invoke_timeout_ms: u64,

    /// How long to wait for each negotiation step, in seconds
    #[arg(long, default_value_t = 10, env = "WINDOW_RTC_STEP_TIMEOUT")]
    step_timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "WINDOW_RTC_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = WindowRtcConfig {
        stun_servers: args.stun_servers.clone(),
        turn_servers: args
            .turn_servers
            .iter()
            .map(|spec| WindowRtcConfig::parse_turn_server(spec))
            .collect::<Result<_, _>>()?,
        invoke_timeout_ms: args.invoke_timeout_ms,
    };
    config.validate()?;
    let step = Duration::from_secs(args.step_timeout_secs);

    let host = LoopbackHost::new();
    let hub = WindowHub::new();
    hub.bind(Arc::new(host.clone()));

    let (console_window, console_transport) = host.open_window();
    let (sender_window, sender_transport) = host.open_window();
    let (receiver_window, receiver_transport) = host.open_window();
    hub.register("console", console_window.clone())?;
    hub.register("Sender", sender_window.clone())?;
    hub.register("Receiver", receiver_window.clone())?;

    let mut console_logs = console_transport.subscribe(Channel::Log);
    tokio::spawn(async move {
        while let Some(line) = console_logs.rx.recv().await {
            info!(target: "console", "{}", line.as_str().unwrap_or_default());
        }
    });

    let engines = Arc::new(WebRtcEngineFactory);
    let sender = Endpoint::new(engines.clone(), config.clone());
    sender.define_transport(sender_transport);
    let receiver = Endpoint::new(engines, config);
    receiver.define_transport(receiver_transport);

    let sender_session = PeerSession::with(&sender, "Receiver")
        .await
        .context("opening Sender -> Receiver")?;
    let receiver_session = PeerSession::with(&receiver, "Sender")
        .await
        .context("opening Receiver -> Sender")?;

    forward_to_console(&sender_session, sender.hub_client()?);
    forward_to_console(&receiver_session, receiver.hub_client()?);
    let mut sender_events = sender_session.subscribe();
    let mut receiver_events = receiver_session.subscribe();

    let track = RtcLocalTrack::opus("sender-audio", "sender-stream");
    let stream = MediaStream::new(
        "sender-stream",
        vec![track.clone() as Arc<dyn MediaTrack>],
    );
    sender_session.add_stream(&stream).await?;

    let silence = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            if let Err(e) = track
                .write_sample(
                    Bytes::from_static(&[0xf8, 0xff, 0xfe]),
                    Duration::from_millis(20),
                )
                .await
            {
                warn!("Stopping silence writer: {}", e);
                break;
            }
        }
    });

    wait_for(&mut receiver_events, EventKind::ReceivedOffer, step)
        .await
        .context("Receiver never saw the offer")?;
    wait_for(&mut sender_events, EventKind::ReceivedAnswer, step)
        .await
        .context("Sender never saw the answer")?;
    info!("Negotiation complete, closing Receiver");

    receiver_window.close();
    let left = wait_for(&mut sender_events, EventKind::PeerLeft, step)
        .await
        .context("Sender never saw Receiver leave")?;
    if left.sender != "Receiver" {
        bail!("peer-left came from '{}', expected 'Receiver'", left.sender);
    }
    info!("Sender observed '{}' leaving", left.sender);

    silence.abort();
    sender_session.dispose().await;
    receiver_session.dispose().await;
    hub.dispose();
    Ok(())
}

fn forward_to_console(session: &PeerSession, client: HubClient) {
    let local = session.local_name().to_string();
    session.on_any(move |data| {
        let line = format!(
            "[{}] {} ({} -> {})",
            local,
            data.kind(),
            data.sender,
            data.receiver
        );
        if let Err(e) = client.log(line) {
            warn!("Failed to forward log line: {}", e);
        }
    });
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<SessionEventData>,
    kind: EventKind,
    timeout: Duration,
) -> anyhow::Result<SessionEventData> {
    tokio::time::timeout(timeout, async {
        while let Some(data) = events.recv().await {
            if data.kind() == kind {
                return Ok(data);
            }
        }
        bail!("event stream ended before {}", kind)
    })
    .await
    .with_context(|| format!("timed out waiting for {}", kind))?
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
