//! Runs a single scripted session against a real control service, so a notify configuration
//! can be checked end to end without a media server. The session connects, publishes or plays,
//! holds the stream open (letting update heartbeats fire) and then closes and disconnects.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use mmids_notify::config::{parse as parse_config_file, NotifyConfig};
use mmids_notify::events::{ConnectEvent, PlayEvent, PublishEvent};
use mmids_notify::hooks::{HookChain, HookDecision};
use mmids_notify::relay::{RelayRequest, SubscriberRequest};
use mmids_notify::session::{start_notify_session, SessionCollaborators, SessionIdentity};
use mmids_notify::transport::HyperTransport;
use mmids_notify::SessionId;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, layer::SubscriberExt};

/// Time given to fire and forget notifications to finish before the process exits
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Publish,
    Play,
}

#[derive(Parser)]
#[command(name = "mmids-notify-probe", version, about)]
struct Args {
    /// Path to the notify configuration file
    #[arg(short, long, default_value = "notify.config")]
    config: PathBuf,

    /// Whether the session publishes or plays the stream
    #[arg(short, long, value_enum, default_value = "publish")]
    mode: Mode,

    /// Application the session connects to
    #[arg(short, long, default_value = "live")]
    app: String,

    /// Stream name to publish or play
    #[arg(short, long)]
    stream: String,

    /// Address reported as the session's peer
    #[arg(long, default_value = "127.0.0.1")]
    peer_address: String,

    /// Seconds to keep the stream open before closing it
    #[arg(long, default_value_t = 10)]
    hold_seconds: u64,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    let args = Args::parse();

    let log_dir = get_log_directory();
    let mut app_log_path = PathBuf::from(log_dir);
    app_log_path.push("probe");

    let log_level = match env::var("mmids_log") {
        Ok(level) => match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        },

        Err(_) => Level::INFO,
    };

    let appender = tracing_appender::rolling::hourly(app_log_path.clone(), "probe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(appender);
    let stdout_writer = std::io::stdout.with_max_level(log_level);
    let json_writer = non_blocking.with_max_level(log_level);

    let subscriber = tracing_subscriber::registry()
        .with(fmt::Layer::new().with_writer(stdout_writer).pretty())
        .with(fmt::Layer::new().with_writer(json_writer).json());

    tracing::subscriber::set_global_default(subscriber)
        .context("Unable to set a global collector")?;

    info!("mmids notify probe {} started", env!("CARGO_PKG_VERSION"));
    info!("Logging to {}", app_log_path.display().to_string());

    let config = read_config(&args).await?;
    run_session(config, &args).await;

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn read_config(args: &Args) -> Result<NotifyConfig> {
    let contents = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("Failed to read '{}'", args.config.display()))?;

    let config = parse_config_file(&contents)
        .with_context(|| format!("Failed to parse '{}'", args.config.display()))?;

    Ok(config)
}

async fn run_session(config: NotifyConfig, args: &Args) {
    let session_id = SessionId::generate();
    let (relay_sender, relay_receiver) = unbounded_channel();
    let (subscriber_sender, subscriber_receiver) = unbounded_channel();
    let (timestamp_sender, timestamp_receiver) = watch::channel(0);

    tokio::spawn(log_relay_requests(relay_receiver));
    tokio::spawn(log_subscriber_requests(subscriber_receiver));

    let identity = SessionIdentity {
        session_id: session_id.clone(),
        peer_address: args.peer_address.clone(),
        client_id: 1,
        epoch: 0,
        is_relay: false,
    };

    let collaborators = SessionCollaborators {
        relay: relay_sender,
        subscribers: subscriber_sender,
        media_timestamp: timestamp_receiver,
    };

    let handle = start_notify_session(
        Arc::new(config),
        identity,
        Arc::new(HyperTransport::new()),
        collaborators,
    );

    let mut hooks = HookChain::new();
    hooks.register(Arc::new(handle));

    info!(session_id = %session_id, app = %args.app, "Connecting");
    let connect = ConnectEvent {
        app: args.app.clone(),
        flash_version: "mmids-probe".to_string(),
        tc_url: format!("rtmp://{}/{}", args.peer_address, args.app),
        ..ConnectEvent::default()
    };

    match hooks.connect(connect).await {
        HookDecision::Proceed(event) => info!(app = %event.app, "Connect approved"),
        HookDecision::Deny => {
            warn!("Connect was denied");
            hooks.disconnect().await;
            return;
        }
    }

    let stream_opened = match args.mode {
        Mode::Publish => {
            let event = PublishEvent {
                stream_name: args.stream.clone(),
                publish_type: "live".to_string(),
                args: String::new(),
            };

            match hooks.publish(event).await {
                HookDecision::Proceed(event) => {
                    info!(stream_name = %event.stream_name, "Publish approved");
                    true
                }

                HookDecision::Deny => {
                    warn!("Publish was denied");
                    false
                }
            }
        }

        Mode::Play => {
            let event = PlayEvent {
                stream_name: args.stream.clone(),
                start: -2,
                duration: -1,
                ..PlayEvent::default()
            };

            match hooks.play(event).await {
                HookDecision::Proceed(event) => {
                    info!(stream_name = %event.stream_name, "Play approved");
                    true
                }

                HookDecision::Deny => {
                    warn!("Play was denied");
                    false
                }
            }
        }
    };

    if stream_opened {
        hold_stream(Duration::from_secs(args.hold_seconds), timestamp_sender).await;
        info!("Closing stream");
        hooks.close_stream().await;
    }

    info!("Disconnecting");
    hooks.disconnect().await;
}

/// Advances the media timestamp like a 25fps stream until the hold time passes or ctrl+c
async fn hold_stream(hold: Duration, timestamps: watch::Sender<u32>) {
    let deadline = tokio::time::sleep(hold);
    tokio::pin!(deadline);

    let mut ticks = tokio::time::interval(Duration::from_millis(40));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = ticks.tick() => {
                timestamps.send_modify(|timestamp| *timestamp = timestamp.wrapping_add(40));
            }
        }
    }
}

async fn log_relay_requests(mut receiver: UnboundedReceiver<RelayRequest>) {
    while let Some(request) = receiver.recv().await {
        match request {
            RelayRequest::Push {
                local_name, target, ..
            } => info!(local_name = %local_name, target = %target.url, "Relay push requested"),

            RelayRequest::Pull {
                local_name, target, ..
            } => info!(local_name = %local_name, target = %target.url, "Relay pull requested"),
        }
    }
}

async fn log_subscriber_requests(mut receiver: UnboundedReceiver<SubscriberRequest>) {
    while let Some(request) = receiver.recv().await {
        match request {
            SubscriberRequest::Rebind { session_id } => {
                info!(session_id = %session_id, "Subscriber rebind requested")
            }
        }
    }
}

fn get_log_directory() -> String {
    match env::var("mmids_log_dir") {
        Ok(dir) => dir,
        Err(_) => "logs".to_string(),
    }
}
