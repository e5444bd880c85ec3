mod audio;
mod cache;
mod ptt;
mod scheduler;
mod session;
mod status;

use std::sync::Arc;

use broadcaster_protocol::config::EndpointConfig;
use broadcaster_protocol::{FileSpec, PlaylistSpec};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

/// Radio-attached playback endpoint: connects to a coordinator, mirrors its
/// audio file cache, and plays scheduled playlists through the configured
/// PTT/COS hardware.
#[derive(Parser, Debug)]
#[command(name = "broadcaster-endpoint", version, about)]
struct Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _cli = Cli::parse();

    let data_dir = broadcaster_protocol::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("endpoint.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,broadcaster_endpoint=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter)
        .with_ansi(false)
        .init();
    eprintln!("broadcaster-endpoint log: {}", log_path.display());

    let mut config = EndpointConfig::load()?;
    config.apply_defaults()?;
    info!(
        server = %config.connection.server_url,
        cache = %config.cache.cache_path.display(),
        "endpoint starting"
    );

    let time_zone = resolve_time_zone(&config.time_zone);

    let ptt = build_ptt(&config)?;
    let cos = build_cos(&config)?;

    let (status_handle, _status_join) = status::spawn(config.time_zone.clone(), cos.clone());

    let (files_tx, files_rx) = watch::channel(Vec::<FileSpec>::new());
    let (playlists_tx, playlists_rx) = watch::channel(Vec::<PlaylistSpec>::new());
    let (stop_tx, stop_rx) = watch::channel(0u64);

    let cache_dir = config.cache.cache_path.clone();
    let http_base_url = config.http_base_url();
    let cache_status: Arc<dyn cache::CacheStatusSink> = Arc::new(status_handle.clone());
    tokio::spawn(async move {
        if let Err(e) = cache::run(cache_dir, http_base_url, files_rx, cache_status).await {
            warn!("cache reconciler exited: {e}");
        }
    });

    let scheduler_cache_dir = config.cache.cache_path.clone();
    tokio::spawn(scheduler::run(
        scheduler_cache_dir,
        time_zone,
        playlists_rx,
        stop_rx,
        ptt.clone(),
        cos,
        status_handle.clone(),
    ));

    let session_handle = tokio::spawn(session::run(
        config.dial_address(),
        config.connection.token.clone(),
        files_tx,
        playlists_tx,
        stop_tx,
        status_handle,
    ));

    shutdown_signal(ptt).await;
    session_handle.abort();
    Ok(())
}

/// `chrono_tz` has no "system local zone" variant; a config of `"Local"`
/// (the default) is mapped to UTC with a one-time warning rather than
/// threading a second, dynamically-offset time type through the scheduler.
/// See DESIGN.md for the rationale.
fn resolve_time_zone(configured: &str) -> chrono_tz::Tz {
    if configured == "Local" {
        warn!("time_zone is \"Local\"; treating playlist start times as UTC");
        return chrono_tz::UTC;
    }
    configured.parse().unwrap_or_else(|_| {
        warn!(time_zone = configured, "unrecognised time zone, falling back to UTC");
        chrono_tz::UTC
    })
}

async fn shutdown_signal(ptt: Arc<dyn ptt::Ptt>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    warn!("shutting down, forcing PTT low");
    ptt.disengage().await;
}

fn build_ptt(config: &EndpointConfig) -> anyhow::Result<Arc<dyn ptt::Ptt>> {
    #[cfg(feature = "rpi-gpio")]
    {
        if config.gpio.ptt_pin >= 0 {
            return Ok(Arc::new(ptt::rpi::RpiPtt::open(
                &config.gpio.gpio_device,
                config.gpio.ptt_pin as u32,
            )?));
        }
    }
    let _ = config;
    Ok(Arc::new(ptt::DefaultPtt))
}

fn build_cos(config: &EndpointConfig) -> anyhow::Result<Arc<dyn ptt::Cos>> {
    #[cfg(feature = "rpi-gpio")]
    {
        if config.gpio.cos_pin >= 0 {
            return Ok(Arc::new(ptt::rpi::RpiCos::open(
                &config.gpio.gpio_device,
                config.gpio.cos_pin as u32,
            )?));
        }
    }
    let _ = config;
    Ok(Arc::new(ptt::DefaultCos))
}
