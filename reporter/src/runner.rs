use std::fmt;
use std::time::Duration;

use frame_caption_common::config::Config;
use frame_caption_common::frame::{jpeg_data_uri, Frame};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, FrameSource};
use crate::inference::Describer;
use crate::journal::DescriptionLog;
use crate::sampler::FrameSampler;

pub struct ReporterSettings {
    pub sample_interval: u64,
    pub jpeg_quality: u8,
    /// Pause after every tick, whether or not a frame was submitted.
    pub tick_interval: Duration,
}

impl ReporterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_interval: config.sampler.interval,
            jpeg_quality: config.inference.jpeg_quality,
            tick_interval: Duration::from_millis(config.sampler.tick_interval_ms),
        }
    }
}

/// Why the capture loop ended.
#[derive(Debug)]
pub enum StopReason {
    Interrupted,
    QuitKey,
    CaptureFailed(CaptureError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Interrupted => f.write_str("interrupted"),
            StopReason::QuitKey => f.write_str("quit key pressed"),
            StopReason::CaptureFailed(e) => write!(f, "capture failed: {e}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub frames_read: u64,
    pub submissions: u64,
    pub described: u64,
    pub network_failures: u64,
    pub parse_failures: u64,
    /// Frames that could not be encoded or whose description could not be logged.
    pub local_failures: u64,
}

#[derive(Debug)]
pub struct RunSummary {
    pub stats: RunStats,
    pub stop: StopReason,
}

/// Owns everything the capture loop touches: the source, the sampler's
/// counter and the description log.
pub struct Reporter<S, D> {
    source: S,
    describer: D,
    journal: DescriptionLog,
    sampler: FrameSampler,
    jpeg_quality: u8,
    tick_interval: Duration,
    stats: RunStats,
}

impl<S: FrameSource, D: Describer> Reporter<S, D> {
    pub fn new(
        source: S,
        describer: D,
        journal: DescriptionLog,
        settings: ReporterSettings,
    ) -> Self {
        Self {
            source,
            describer,
            journal,
            sampler: FrameSampler::new(settings.sample_interval),
            jpeg_quality: settings.jpeg_quality,
            tick_interval: settings.tick_interval,
            stats: RunStats::default(),
        }
    }

    /// Run until `stop` turns true, the quit key is pressed, or a read fails.
    ///
    /// Requests are awaited one at a time, so at most one is ever in flight.
    /// The source is released exactly once, whichever way the loop ends.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> RunSummary {
        info!(journal = self.journal.path().display().to_string(), "capture loop started");

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break StopReason::Interrupted,
                read = self.source.read_frame() => match read {
                    Ok(frame) => frame,
                    Err(e) => break StopReason::CaptureFailed(e),
                },
            };
            self.stats.frames_read += 1;

            if let Some(count) = self.sampler.tick() {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => break StopReason::Interrupted,
                    _ = self.submit(&frame, count) => {}
                }
            }
            if self.sampler.at_progress_mark() {
                debug!(frames_seen = self.sampler.frames_seen(), "frames processed");
            }

            if self.source.quit_requested() {
                break StopReason::QuitKey;
            }

            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break StopReason::Interrupted,
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        };

        self.source.release();

        match &reason {
            StopReason::CaptureFailed(e) => error!(error = %e, "frame read failed, stopping"),
            other => info!(reason = %other, "capture loop stopped"),
        }

        RunSummary {
            stats: self.stats,
            stop: reason,
        }
    }

    /// Encode, describe and log one sampled frame. Failures are reported and
    /// counted, never propagated.
    async fn submit(&mut self, frame: &Frame, count: u64) {
        self.stats.submissions += 1;

        let jpeg = match frame.encode_jpeg(self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(error = %e, count, seq = frame.seq, "failed to encode frame, skipping");
                self.stats.local_failures += 1;
                return;
            }
        };
        let image_uri = jpeg_data_uri(&jpeg);
        debug!(
            count,
            seq = frame.seq,
            captured_at_ms = frame.captured_at_ms,
            jpeg_bytes = jpeg.len(),
            "submitting frame"
        );

        match self.describer.describe(&image_uri).await {
            Ok(description) => match self.journal.append(&description).await {
                Ok(()) => {
                    self.stats.described += 1;
                    info!(count, description = description.trim(), "frame described");
                }
                Err(e) => {
                    error!(error = %e, count, "failed to log description");
                    self.stats.local_failures += 1;
                }
            },
            Err(e) if e.is_network() => {
                warn!(error = %e, count, "inference request failed");
                self.stats.network_failures += 1;
            }
            Err(e) => {
                warn!(error = %e, count, "no valid response from inference server");
                self.stats.parse_failures += 1;
            }
        }
    }
}

/// Resolves once the stop flag is true. A dropped sender never stops the loop.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
