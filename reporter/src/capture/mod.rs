//! Frame sources: a local video device (OpenCV) or an HTTP MJPEG stream.

#[cfg(feature = "opencv")]
pub mod device;
pub mod mjpeg;

use frame_caption_common::config::CaptureConfig;
use frame_caption_common::frame::Frame;

/// Capture format as requested from, or reported by, a source.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub fourcc: Option<String>,
}

impl CaptureSettings {
    pub fn requested(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            fourcc: Some(config.fourcc.clone()),
        }
    }
}

/// Something the reporter can pull frames from.
///
/// `release` must be idempotent; the reporter calls it once on every exit
/// path and implementations also call it on drop.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// Read the next frame. Any error ends the capture loop.
    async fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Settings actually in effect, if the source can report them.
    fn negotiated(&self) -> Option<CaptureSettings> {
        None
    }

    /// Whether the user asked to quit (e.g. a key press in a preview window).
    fn quit_requested(&mut self) -> bool {
        false
    }

    fn release(&mut self);
}

/// The configured capture backend.
pub enum Camera {
    #[cfg(feature = "opencv")]
    Device(device::DeviceCamera),
    Mjpeg(mjpeg::MjpegCamera),
}

/// Open the backend named by `config.backend`.
pub async fn open(config: &CaptureConfig) -> Result<Camera, CaptureError> {
    match config.backend.as_str() {
        "device" => open_device(config),
        "mjpeg" => Ok(Camera::Mjpeg(mjpeg::MjpegCamera::connect(&config.url).await?)),
        other => Err(CaptureError::UnknownBackend(other.to_string())),
    }
}

#[cfg(feature = "opencv")]
fn open_device(config: &CaptureConfig) -> Result<Camera, CaptureError> {
    Ok(Camera::Device(device::DeviceCamera::open(config)?))
}

#[cfg(not(feature = "opencv"))]
fn open_device(_config: &CaptureConfig) -> Result<Camera, CaptureError> {
    Err(CaptureError::Unsupported(
        "the \"device\" backend needs a build with the `opencv` feature",
    ))
}

impl FrameSource for Camera {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        match self {
            #[cfg(feature = "opencv")]
            Camera::Device(cam) => cam.read_frame().await,
            Camera::Mjpeg(cam) => cam.read_frame().await,
        }
    }

    fn negotiated(&self) -> Option<CaptureSettings> {
        match self {
            #[cfg(feature = "opencv")]
            Camera::Device(cam) => cam.negotiated(),
            Camera::Mjpeg(cam) => cam.negotiated(),
        }
    }

    fn quit_requested(&mut self) -> bool {
        match self {
            #[cfg(feature = "opencv")]
            Camera::Device(cam) => cam.quit_requested(),
            Camera::Mjpeg(cam) => cam.quit_requested(),
        }
    }

    fn release(&mut self) {
        match self {
            #[cfg(feature = "opencv")]
            Camera::Device(cam) => cam.release(),
            Camera::Mjpeg(cam) => cam.release(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to open video source {source_name}: {reason}")]
    Open { source_name: String, reason: String },
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("stream ended")]
    StreamEnded,
    #[error("capture source already released")]
    Released,
    #[error("unknown capture backend {0:?}, expected \"device\" or \"mjpeg\"")]
    UnknownBackend(String),
    #[error("{0}")]
    Unsupported(&'static str),
}
