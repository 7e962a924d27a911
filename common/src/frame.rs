use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageReader};
use std::io::Cursor;

const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Pixel layout of a raw raster frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Interleaved blue/green/red, the native layout of OpenCV captures.
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// The image carried by a frame: a raster from a local device, or an
/// already-compressed JPEG from a network stream.
#[derive(Debug, Clone)]
pub enum FramePayload {
    Raw {
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    Jpeg(Vec<u8>),
}

/// A captured camera frame with timestamp metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: FramePayload,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn raw(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at_ms: i64,
        seq: u64,
    ) -> Self {
        Self {
            payload: FramePayload::Raw {
                data,
                width,
                height,
                format,
            },
            captured_at_ms,
            seq,
        }
    }

    pub fn jpeg(jpeg_data: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload: FramePayload::Jpeg(jpeg_data),
            captured_at_ms,
            seq,
        }
    }

    /// Encode the frame as a baseline JPEG at `quality` (1..=100).
    ///
    /// Output is a pure function of the pixels and the quality, so the same
    /// frame always yields the same bytes. JPEG payloads are decoded and
    /// re-encoded so the configured quality applies to every source.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        match &self.payload {
            FramePayload::Raw {
                data,
                width,
                height,
                format,
            } => {
                let expected = *width as usize * *height as usize * format.channels();
                if data.len() != expected {
                    return Err(FrameError::BadRaster {
                        got: data.len(),
                        expected,
                        width: *width,
                        height: *height,
                    });
                }
                match format {
                    PixelFormat::Rgb8 => {
                        encode(data, *width, *height, ExtendedColorType::Rgb8, quality)
                    }
                    PixelFormat::Bgr8 => {
                        let rgb = bgr_to_rgb(data);
                        encode(&rgb, *width, *height, ExtendedColorType::Rgb8, quality)
                    }
                    PixelFormat::Gray8 => {
                        encode(data, *width, *height, ExtendedColorType::L8, quality)
                    }
                }
            }
            FramePayload::Jpeg(jpeg_data) => {
                let img = ImageReader::new(Cursor::new(jpeg_data))
                    .with_guessed_format()
                    .map_err(|e| FrameError::Decode(e.to_string()))?
                    .decode()
                    .map_err(|e| FrameError::Decode(e.to_string()))?
                    .to_rgb8();
                encode(
                    img.as_raw(),
                    img.width(),
                    img.height(),
                    ExtendedColorType::Rgb8,
                    quality,
                )
            }
        }
    }
}

fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    color: ExtendedColorType,
    quality: u8,
) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(pixels.len() / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(pixels, width, height, color)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    Ok(out)
}

fn bgr_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len());
    for px in data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// Wrap JPEG bytes in a `data:image/jpeg;base64,` URI.
pub fn jpeg_data_uri(jpeg_data: &[u8]) -> String {
    let mut uri = String::with_capacity(DATA_URI_PREFIX.len() + jpeg_data.len() * 4 / 3 + 4);
    uri.push_str(DATA_URI_PREFIX);
    STANDARD.encode_string(jpeg_data, &mut uri);
    uri
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raster is {got} bytes, expected {expected} for {width}x{height}")]
    BadRaster {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("failed to decode JPEG frame: {0}")]
    Decode(String),
    #[error("failed to encode JPEG: {0}")]
    Encode(String),
}
