//! HTTP camera source (ESP32 camera boards and similar).
//!
//! The first response decides the mode: a `multipart/*` content type is an
//! MJPEG stream read frame by frame; anything else is a snapshot endpoint
//! fetched once per read. A broken stream is dropped and re-opened on the
//! next read.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

use super::FrameSource;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpCameraSource {
    url: String,
    mode: HttpMode,
    frames_read: u64,
}

enum HttpMode {
    /// Streaming endpoint; `None` after an error until the next reconnect.
    Mjpeg(Option<MjpegStream>),
    Snapshot,
}

impl HttpCameraSource {
    /// Probe the endpoint. Fails when the camera cannot be reached at all.
    pub fn connect(url: &str) -> Result<Self> {
        let mode = match open_stream(url)? {
            Some(stream) => HttpMode::Mjpeg(Some(stream)),
            None => HttpMode::Snapshot,
        };
        log::info!(
            "HttpCameraSource: connected to {} ({})",
            url,
            match mode {
                HttpMode::Mjpeg(_) => "mjpeg",
                HttpMode::Snapshot => "snapshot",
            }
        );
        Ok(Self {
            url: url.to_string(),
            mode,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        match &mut self.mode {
            HttpMode::Snapshot => fetch_single_jpeg(&self.url),
            HttpMode::Mjpeg(slot) => {
                if slot.is_none() {
                    *slot = open_stream(&self.url)?;
                }
                let stream = slot
                    .as_mut()
                    .ok_or_else(|| anyhow!("{} no longer serves an mjpeg stream", self.url))?;
                match stream.read_next_jpeg() {
                    Ok(jpeg) => Ok(jpeg),
                    Err(err) => {
                        *slot = None;
                        Err(err)
                    }
                }
            }
        }
    }
}

impl FrameSource for HttpCameraSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let jpeg = self.next_jpeg()?;
        let frame = Frame::decode(&jpeg)?;
        self.frames_read += 1;
        Ok(frame)
    }

    fn is_opened(&self) -> bool {
        true
    }
}

/// `Some` for a multipart stream, `None` for a snapshot endpoint.
fn open_stream(url: &str) -> Result<Option<MjpegStream>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("connect to camera {}", url))?;
    let content_type = response.header("Content-Type").unwrap_or("");
    if content_type.to_lowercase().contains("multipart") {
        Ok(Some(MjpegStream::new(response.into_reader())))
    } else {
        Ok(None)
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Byte range of the first complete SOI..EOI image in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    #[test]
    fn jpeg_bounds_skip_multipart_headers() {
        let mut buf = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let head = buf.len();
        buf.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buf.extend_from_slice(b"\r\n--frame");
        assert_eq!(find_jpeg_bounds(&buf), Some((head, head + 7)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0, 0]), None);
    }

    #[test]
    fn mjpeg_stream_yields_frames_in_order() -> Result<()> {
        let first = Frame::filled(16, 8, Rgb([200, 0, 0])).encode_jpeg()?;
        let second = Frame::filled(8, 4, Rgb([0, 200, 0])).encode_jpeg()?;
        let mut body = Vec::new();
        for jpeg in [&first, &second] {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(jpeg);
            body.extend_from_slice(b"\r\n");
        }

        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        assert_eq!(Frame::decode(&stream.read_next_jpeg()?)?.dimensions(), (16, 8));
        assert_eq!(Frame::decode(&stream.read_next_jpeg()?)?.dimensions(), (8, 4));
        assert!(stream.read_next_jpeg().is_err());
        Ok(())
    }
}
