//! `stream` and `ping` commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use echolens_client::{ClientConfig, SessionClient, WebSocketTransport};
use echolens_core::config::Config;
use echolens_core::protocol::{InboundMessage, StreamMode};
use echolens_core::session::Session;
use echolens_media::{AudioPump, FrameStream, StopReason, paced, pcm_frames};
use echolens_router::{ConsoleSink, ResultRouter, RouterEvent};

/// Options of the `stream` command.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Audio file; `None` or `-` reads stdin.
    pub file: Option<PathBuf>,
    pub mode: Option<StreamMode>,
    pub lang: Option<String>,
    pub translate_to: Option<String>,
    pub session_id: Option<String>,
    pub realtime: bool,
    pub partials: bool,
    /// How long to wait for trailing results after the audio ends.
    pub linger: Duration,
}

fn client_for(config: &Config, mode: Option<StreamMode>) -> anyhow::Result<(SessionClient, String)> {
    let url = config
        .service_url()
        .context("No service URL configured (set service.url)")?;
    let mut client_config = ClientConfig::from_config(config);
    if let Some(mode) = mode {
        client_config.mode = mode;
    }
    let transport = WebSocketTransport::new(url).with_write_timeout(config.write_timeout());
    let url = transport.url().to_owned();
    info!(%url, mode = %client_config.mode, "Using service");
    Ok((SessionClient::new(transport, client_config), url))
}

async fn open_source(file: Option<&PathBuf>, frame_bytes: usize) -> anyhow::Result<FrameStream> {
    match file {
        Some(path) if path.as_os_str() != "-" => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open audio file {}", path.display()))?;
            info!(path = %path.display(), frame_bytes, "Streaming audio file");
            Ok(pcm_frames(file, frame_bytes))
        }
        _ => {
            info!(frame_bytes, "Streaming audio from stdin");
            Ok(pcm_frames(tokio::io::stdin(), frame_bytes))
        }
    }
}

pub async fn run_stream(config: &Config, options: StreamOptions) -> anyhow::Result<()> {
    let (client, url) = client_for(config, options.mode)?;
    let mode = client.mode();
    let spec = config.audio_spec();

    let mut errors = client.errors();
    let error_task = tokio::spawn(async move {
        while let Some(event) = errors.next().await {
            eprintln!("error [{:?}]: {event}", event.kind);
        }
    });

    let session_id = options.session_id.clone().unwrap_or_else(Session::generate_id);
    let (router_tx, mut router_events) = mpsc::unbounded_channel();
    let mut router = ResultRouter::new(Arc::new(ConsoleSink::new().with_partials(options.partials)))
        .with_events(router_tx);
    if mode == StreamMode::Session {
        router = router.with_session(session_id.clone());
    }
    let router_task = router.spawn(client.results());

    if !client.connect().await {
        error_task.abort();
        router_task.abort();
        bail!("Could not connect to {url}");
    }

    let frames = open_source(options.file.as_ref(), config.frame_bytes()).await?;
    let frames = if options.realtime {
        paced(frames, spec.clone())
    } else {
        frames
    };

    let pump = match mode {
        StreamMode::Session => {
            let lang = options.lang.clone().unwrap_or_else(|| config.lang());
            let translate_to = options.translate_to.clone().or_else(|| config.translate_to());
            client.start(&session_id, spec, lang, translate_to)?;
            AudioPump::session(client.clone(), &session_id)
        }
        StreamMode::Raw => AudioPump::raw(client.clone()),
    };

    let cancel = pump.cancel_token();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing");
                cancel.cancel();
            }
        }
    });

    let report = pump.spawn(frames).await.context("Audio pump panicked")?;
    let disconnected = report.stopped == StopReason::Disconnected;
    match &report.stopped {
        StopReason::SourceError(reason) => warn!(%reason, "Audio source ended with an error"),
        StopReason::Disconnected => warn!("Connection lost while streaming"),
        _ => {}
    }

    if mode == StreamMode::Session && !disconnected {
        if let Err(e) = client.end(&session_id) {
            warn!(session_id = %session_id, %e, "Could not end session");
        }
    }

    if !cancel.is_cancelled() && !disconnected {
        let final_seen = async {
            while let Some(event) = router_events.recv().await {
                if matches!(event, RouterEvent::Final { .. }) && mode == StreamMode::Session {
                    break;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(options.linger) => {}
            _ = final_seen => {}
            _ = cancel.cancelled() => {}
        }
    }

    client.close().await;
    ctrl_c.abort();
    router_task.abort();
    error_task.abort();

    let stats = client.stats();
    info!(
        frames_read = report.frames_read,
        frames_queued = report.frames_queued,
        frames_dropped = report.frames_dropped,
        frames_written = stats.frames_written,
        stopped = ?report.stopped,
        "Stream finished"
    );
    if report.frames_dropped > 0 {
        eprintln!(
            "{} of {} audio frames were dropped under backpressure",
            report.frames_dropped, report.frames_read
        );
    }
    Ok(())
}

pub async fn run_ping(config: &Config, timeout: Duration) -> anyhow::Result<()> {
    let (client, url) = client_for(config, Some(StreamMode::Raw))?;
    let mut results = client.subscribe_results();

    if !client.connect().await {
        bail!("Could not connect to {url}");
    }

    let sent = Instant::now();
    client.ping()?;
    let pong = tokio::time::timeout(timeout, async {
        loop {
            match results.recv().await {
                Ok(InboundMessage::Pong) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await;
    let rtt = sent.elapsed();
    client.close().await;

    match pong {
        Ok(true) => {
            println!("pong from {url} in {} ms", rtt.as_millis());
            Ok(())
        }
        Ok(false) => bail!("Result stream closed before pong"),
        Err(_) => bail!("No pong from {url} within {} ms", timeout.as_millis()),
    }
}
