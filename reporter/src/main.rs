mod capture;
mod inference;
mod journal;
mod runner;
mod sampler;
#[cfg(test)]
mod testutil;

use std::path::{Path, PathBuf};

use capture::{CaptureSettings, FrameSource};
use frame_caption_common::config::{CaptureConfig, Config};
use inference::HttpDescriber;
use journal::DescriptionLog;
use runner::{Reporter, ReporterSettings, StopReason};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let explicit_path = std::env::args().nth(1).map(PathBuf::from);
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // An explicitly named config must exist; the default one is optional.
    let loaded = match &explicit_path {
        Some(path) => Config::load(path).map(|c| (c, true)),
        None => Config::load_or_default(&config_path),
    };
    let (config, from_file) = match loaded {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if !from_file {
        info!(path = config_path.display().to_string(), "no config file found, using defaults");
    }
    info!(
        backend = config.capture.backend,
        device_index = config.capture.device_index,
        sample_interval = config.sampler.interval,
        tick_interval_ms = config.sampler.tick_interval_ms,
        endpoint = config.inference.endpoint(),
        model = config.inference.model,
        max_tokens = config.inference.max_tokens,
        jpeg_quality = config.inference.jpeg_quality,
        timeout_secs = config.inference.timeout_secs,
        output = config.output.path,
        "starting frame-caption reporter"
    );

    let describer = match HttpDescriber::new(&config.inference) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to create inference client");
            std::process::exit(1);
        }
    };

    let journal = match DescriptionLog::open(Path::new(&config.output.path)).await {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "failed to open description log");
            std::process::exit(1);
        }
    };

    // A source that never opens is fatal; there is nothing to retry against.
    let camera = match capture::open(&config.capture).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, backend = config.capture.backend, "failed to open capture source");
            std::process::exit(1);
        }
    };
    log_negotiation(&config.capture, &camera);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    info!(endpoint = describer.endpoint(), "entering capture loop");
    let summary = Reporter::new(camera, describer, journal, ReporterSettings::from_config(&config))
        .run(stop_rx)
        .await;

    let stats = &summary.stats;
    info!(
        frames_read = stats.frames_read,
        submissions = stats.submissions,
        described = stats.described,
        network_failures = stats.network_failures,
        parse_failures = stats.parse_failures,
        local_failures = stats.local_failures,
        stop = %summary.stop,
        "frame-caption reporter finished"
    );

    if matches!(summary.stop, StopReason::CaptureFailed(_)) {
        std::process::exit(1);
    }
}

/// Log what the source accepted next to what was asked for.
fn log_negotiation(config: &CaptureConfig, camera: &impl FrameSource) {
    let requested = CaptureSettings::requested(config);
    match camera.negotiated() {
        Some(actual) if actual == requested => {
            info!(settings = ?actual, "capture settings accepted as requested");
        }
        Some(actual) => {
            info!(
                requested = ?requested,
                negotiated = ?actual,
                "capture source fell back to its own settings"
            );
        }
        None => debug!("capture source does not report negotiated settings"),
    }
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => info!("received Ctrl-C, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c().await;
                info!("received Ctrl-C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
