use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use frame_caption_common::frame::Frame;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use tracing::{debug, info};

use super::{CaptureError, FrameSource};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker, e.g. `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` body.
///
/// A part is emitted once the boundary that follows it has arrived.
pub struct MjpegParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed a chunk of the body; returns every JPEG completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let boundary_len = self.boundary.len();
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + boundary_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > boundary_len {
                            let _ = self.buffer.split_to(self.buffer.len() - boundary_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let found = find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary);
                    if let Some(pos) = found {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg_data = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(jpeg_end + boundary_len);

                        if !jpeg_data.is_empty() {
                            frames.push(jpeg_data);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Resume the scan where a split boundary could start
                        self.jpeg_start = self.buffer.len().saturating_sub(boundary_len);
                        break;
                    }
                }
            }
        }

        frames
    }
}

/// Frame source reading an MJPEG stream over HTTP.
///
/// A read returns the newest part already received. Older buffered parts
/// are skipped but still counted in `seq`. The stream is not reconnected:
/// once it ends or errors every further read fails.
pub struct MjpegCamera {
    url: String,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MjpegParser,
    pending: VecDeque<Vec<u8>>,
    /// Stream error seen while draining, reported once buffered parts are used.
    deferred: Option<CaptureError>,
    seq: u64,
}

impl MjpegCamera {
    pub async fn connect(url: &str) -> Result<Self, CaptureError> {
        if url.is_empty() {
            return Err(CaptureError::Open {
                source_name: "mjpeg".into(),
                reason: "capture.url is empty".into(),
            });
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CaptureError::HttpConnect)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        info!(url, status = %response.status(), boundary, "connected to MJPEG stream");

        Ok(Self {
            url: url.to_string(),
            stream: Some(response.bytes_stream().fuse().boxed()),
            parser: MjpegParser::new(&boundary),
            pending: VecDeque::new(),
            deferred: None,
            seq: 0,
        })
    }
}

impl FrameSource for MjpegCamera {
    async fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        while self.pending.is_empty() {
            if let Some(err) = self.deferred.take() {
                return Err(err);
            }
            let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;
            match stream.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.parser.push(&chunk)),
                Some(Err(e)) => return Err(CaptureError::HttpStream(e)),
                None => return Err(CaptureError::StreamEnded),
            }
        }

        // Take whatever else has already arrived without waiting for more.
        // One yield lets the connection task hand over bytes it already read.
        if let Some(stream) = self.stream.as_mut() {
            let mut idle = false;
            while self.deferred.is_none() {
                match stream.next().now_or_never() {
                    Some(Some(Ok(chunk))) => {
                        idle = false;
                        self.pending.extend(self.parser.push(&chunk));
                    }
                    Some(Some(Err(e))) => self.deferred = Some(CaptureError::HttpStream(e)),
                    Some(None) => self.deferred = Some(CaptureError::StreamEnded),
                    None if idle => break,
                    None => {
                        idle = true;
                        tokio::task::yield_now().await;
                    }
                }
            }
        }

        let skipped = self.pending.len() as u64 - 1;
        let jpeg_data = self.pending.pop_back().ok_or(CaptureError::StreamEnded)?;
        self.pending.clear();
        self.seq += skipped + 1;
        if skipped > 0 {
            debug!(skipped, seq = self.seq, "skipped stale MJPEG frames");
        }
        debug!(seq = self.seq, bytes = jpeg_data.len(), "MJPEG frame received");
        Ok(Frame::jpeg(jpeg_data, Utc::now().timestamp_millis(), self.seq))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.deferred = None;
        if self.stream.take().is_some() {
            info!(url = self.url, "MJPEG stream closed");
        }
    }
}

/// Extract `boundary=` from a multipart Content-Type header.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
