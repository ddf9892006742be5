//! rtsp-ws-relay: serve RTSP cameras to browsers over WebSocket
//!
//! Examples:
//!   rtsp-ws-relay --stream lobby=rtsp://10.0.0.5:554/stream1
//!   rtsp-ws-relay --config relay.toml --bind 127.0.0.1:9000
//!
//! A browser with JSMpeg then plays `ws://host:8888/ws/lobby`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use rtsp_ws_relay::{FfmpegTranscoder, FileConfig, RelayServer, SessionEvent, SessionManager};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file).
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<SocketAddr>,

    /// ffmpeg executable (overrides the config file).
    #[arg(long, env = "FFMPEG_BIN")]
    ffmpeg: Option<PathBuf>,

    /// Extra stream as NAME=URL; may be repeated.
    #[arg(long = "stream", value_name = "NAME=URL", value_parser = parse_stream_arg)]
    streams: Vec<(String, String)>,

    /// Stream served on `/` and `/ws`.
    #[arg(long)]
    default_stream: Option<String>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_stream_arg(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected NAME=URL, got {:?}", value)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = match args.config {
        Some(ref path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mut server_config = file.server_config();
    if let Some(addr) = args.bind {
        server_config = server_config.bind(addr);
    }

    let mut ffmpeg_config = file.ffmpeg_config();
    if let Some(ref binary) = args.ffmpeg {
        ffmpeg_config = ffmpeg_config.binary(binary.clone());
    }

    let mut sessions = file.session_configs();
    for (name, url) in &args.streams {
        rtsp_ws_relay::transcode::parse_source(url)?;
        sessions.retain(|session| &session.name != name);
        sessions.push(file.ad_hoc_session_config(name.clone(), url.clone()));
    }

    let default_stream = args
        .default_stream
        .clone()
        .or_else(|| server_config.default_stream.clone())
        .or_else(|| (sessions.len() == 1).then(|| sessions[0].name.clone()));
    if let Some(stream) = default_stream {
        server_config = server_config.default_stream(stream);
    }

    if sessions.is_empty() {
        tracing::warn!("No streams configured; use --stream NAME=URL or a config file");
    }

    let manager = SessionManager::new(
        FfmpegTranscoder::new(ffmpeg_config),
        file.manager_config(),
    );
    for session in sessions {
        manager.register_stream(session).await;
    }

    let log_task = tokio::spawn(log_session_events(manager.subscribe_events()));

    let server = RelayServer::new(server_config, manager);
    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    log_task.abort();
    result?;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Log the session events worth an operator's attention
async fn log_session_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { stream, state }) => {
                tracing::info!(stream = %stream, state = %state, "Stream state");
            }
            Ok(SessionEvent::ProcessFailed {
                stream,
                error,
                restart_in,
            }) => match restart_in {
                Some(delay) => tracing::warn!(
                    stream = %stream,
                    error = %error,
                    restart_in_ms = delay.as_millis() as u64,
                    "Transcoder exited, restarting"
                ),
                None => tracing::error!(stream = %stream, error = %error, "Transcoder exited"),
            },
            Ok(SessionEvent::PermanentFailure { stream, error }) => {
                tracing::error!(stream = %stream, error = %error, "Stream gave up");
            }
            Ok(SessionEvent::ChunkRelayed {
                stream,
                bytes,
                viewers,
            }) => {
                tracing::trace!(stream = %stream, bytes = bytes, viewers = viewers, "Chunk relayed");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped = skipped, "Session event log lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
