//! OpenCV-backed local camera capture.

use chrono::Utc;
use frame_caption_common::config::CaptureConfig;
use frame_caption_common::frame::{Frame, PixelFormat};
use opencv::{
    core::{Mat, MatTraitConst, MatTraitConstManual},
    highgui,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{debug, info, warn};

use super::{CaptureError, CaptureSettings, FrameSource};

const PREVIEW_WINDOW: &str = "frame-caption";

pub struct DeviceCamera {
    cap: VideoCapture,
    frame: Mat,
    index: i32,
    preview: bool,
    negotiated: CaptureSettings,
    seq: u64,
    released: bool,
}

impl DeviceCamera {
    /// Open the device and request the configured format. The requests are
    /// best-effort; what the driver actually accepted is read back after.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(config.device_index)?;

        request_settings(&mut cap, config);
        let negotiated = query_settings(&cap);

        if config.preview {
            highgui::named_window(PREVIEW_WINDOW, highgui::WINDOW_AUTOSIZE).map_err(|e| {
                CaptureError::Open {
                    source_name: format!("preview window {PREVIEW_WINDOW}"),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(Self {
            cap,
            frame: Mat::default(),
            index: config.device_index,
            preview: config.preview,
            negotiated,
            seq: 0,
            released: false,
        })
    }

    fn read_blocking(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Released);
        }

        let grabbed = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Read(e.to_string()))?;
        if !grabbed || self.frame.empty() {
            return Err(CaptureError::Read(format!("device #{} returned no frame", self.index)));
        }

        let size = self.frame.size().map_err(|e| CaptureError::Read(e.to_string()))?;
        let format = match self.frame.channels() {
            3 => PixelFormat::Bgr8,
            1 => PixelFormat::Gray8,
            n => return Err(CaptureError::Read(format!("unsupported channel count {n}"))),
        };
        let data = self
            .frame
            .data_bytes()
            .map_err(|e| CaptureError::Read(e.to_string()))?
            .to_vec();

        if self.preview {
            if let Err(e) = highgui::imshow(PREVIEW_WINDOW, &self.frame) {
                debug!(error = %e, "preview update failed");
            }
        }

        self.seq += 1;
        Ok(Frame::raw(
            data,
            size.width as u32,
            size.height as u32,
            format,
            Utc::now().timestamp_millis(),
            self.seq,
        ))
    }
}

impl FrameSource for DeviceCamera {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        tokio::task::block_in_place(|| self.read_blocking())
    }

    fn negotiated(&self) -> Option<CaptureSettings> {
        Some(self.negotiated.clone())
    }

    fn quit_requested(&mut self) -> bool {
        if !self.preview {
            return false;
        }
        matches!(highgui::wait_key(1), Ok(key) if key & 0xFF == i32::from(b'q'))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.cap.release() {
            warn!(error = %e, index = self.index, "failed to release capture device");
        }
        if self.preview {
            let _ = highgui::destroy_window(PREVIEW_WINDOW);
        }
        info!(index = self.index, "capture device released");
    }
}

impl Drop for DeviceCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open a camera by index, preferring V4L2 and falling back to any backend.
fn open_video_capture(index: i32) -> Result<VideoCapture, CaptureError> {
    for backend in [videoio::CAP_V4L2, videoio::CAP_ANY] {
        match VideoCapture::new(index, backend) {
            Ok(cap) => {
                if cap.is_opened().unwrap_or(false) {
                    return Ok(cap);
                }
                debug!(index, backend, "device did not open with backend");
            }
            Err(err) => {
                warn!(index, backend, error = %err, "failed to open device");
            }
        }
    }

    Err(CaptureError::Open {
        source_name: format!("/dev/video{index}"),
        reason: "no backend could open the device".into(),
    })
}

/// Request format, resolution and rate. Outcomes are not checked here;
/// `query_settings` reads back what the driver accepted.
fn request_settings(cap: &mut VideoCapture, config: &CaptureConfig) {
    let c: Vec<char> = config.fourcc.chars().collect();
    if let &[c1, c2, c3, c4] = c.as_slice() {
        if let Ok(code) = videoio::VideoWriter::fourcc(c1, c2, c3, c4) {
            let _ = cap.set(videoio::CAP_PROP_FOURCC, code as f64);
        }
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, config.fps);
}

fn query_settings(cap: &VideoCapture) -> CaptureSettings {
    let prop = |id| cap.get(id).unwrap_or(0.0);
    CaptureSettings {
        width: prop(videoio::CAP_PROP_FRAME_WIDTH) as u32,
        height: prop(videoio::CAP_PROP_FRAME_HEIGHT) as u32,
        fps: prop(videoio::CAP_PROP_FPS),
        fourcc: fourcc_to_string(prop(videoio::CAP_PROP_FOURCC) as u32),
    }
}

/// Decode a little-endian FOURCC code; `None` when the driver reports none.
fn fourcc_to_string(code: u32) -> Option<String> {
    if code == 0 {
        return None;
    }
    let bytes = code.to_le_bytes();
    bytes
        .iter()
        .all(|b| b.is_ascii_graphic() || *b == b' ')
        .then(|| bytes.iter().map(|&b| b as char).collect())
}
