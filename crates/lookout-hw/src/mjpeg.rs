//! `multipart/x-mixed-replace` JPEG streams: part framing for the server
//! side, a part reader and an HTTP frame source for the client side.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::FrameSource;
use std::io::{self, BufRead, BufReader, Read};

/// Boundary token used by the stream server.
pub const BOUNDARY: &str = "frame";
/// Response content type of an MJPEG stream using [`BOUNDARY`].
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
/// Largest part body, header line or unframed body line the reader accepts.
pub const MAX_PART_LEN: usize = 16 * 1024 * 1024;

/// Frame one JPEG as a multipart part:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn encode_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--");
    part.extend_from_slice(BOUNDARY.as_bytes());
    part.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Extract the `boundary` parameter of a `multipart/*` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Before the first delimiter line.
    Preamble,
    /// Positioned just after a delimiter line, at the headers of a part.
    AtPart,
    Done,
}

/// Reads successive part bodies from a multipart byte stream.
pub struct MultipartReader<R> {
    reader: R,
    delimiter: Vec<u8>,
    state: ReadState,
    max_part: usize,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            delimiter: format!("--{boundary}").into_bytes(),
            state: ReadState::Preamble,
            max_part: MAX_PART_LEN,
        }
    }

    /// Replace the [`MAX_PART_LEN`] bound.
    pub fn with_max_part(mut self, max_part: usize) -> Self {
        self.max_part = max_part;
        self
    }

    /// Body of the next part, or `None` at end of stream or after the
    /// closing `--boundary--` delimiter.
    pub fn next_part(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.state == ReadState::Preamble {
            self.skip_to_delimiter()?;
        }
        if self.state == ReadState::Done {
            return Ok(None);
        }

        let Some(content_length) = self.read_headers()? else {
            self.state = ReadState::Done;
            return Ok(None);
        };

        match content_length {
            Some(len) => {
                if len > self.max_part {
                    return Err(too_large(len, self.max_part));
                }
                let mut body = Vec::with_capacity(len);
                self.reader.by_ref().take(len as u64).read_to_end(&mut body)?;
                if body.len() < len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("part ended after {} of {len} bytes", body.len()),
                    ));
                }
                self.skip_to_delimiter()?;
                Ok(Some(body))
            }
            None => self.read_until_delimiter(),
        }
    }

    /// One line, `\n` included. Lines longer than the part bound are an error.
    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();
        let limit = self.max_part as u64 + 2;
        let read = self.reader.by_ref().take(limit).read_until(b'\n', line)?;
        if read as u64 == limit && !line.ends_with(b"\n") {
            return Err(too_large(read, self.max_part));
        }
        Ok(read > 0)
    }

    /// Consume lines until a delimiter; sets the state from the delimiter kind.
    fn skip_to_delimiter(&mut self) -> io::Result<()> {
        let mut line = Vec::new();
        loop {
            if !self.read_line(&mut line)? {
                self.state = ReadState::Done;
                return Ok(());
            }
            if let Some(state) = self.classify(&line) {
                self.state = state;
                return Ok(());
            }
        }
    }

    /// Part headers up to the blank line. Outer `None` means the stream ended
    /// inside the headers; inner value is the `Content-Length`, if any.
    fn read_headers(&mut self) -> io::Result<Option<Option<usize>>> {
        let mut line = Vec::new();
        let mut content_length = None;
        loop {
            if !self.read_line(&mut line)? {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(trim_eol(&line)).into_owned();
            if text.is_empty() {
                return Ok(Some(content_length));
            }
            if let Some((name, value)) = text.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().ok();
                }
            }
        }
    }

    fn read_until_delimiter(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut body = Vec::new();
        let mut line = Vec::new();
        loop {
            if !self.read_line(&mut line)? {
                self.state = ReadState::Done;
                break;
            }
            if let Some(state) = self.classify(&line) {
                self.state = state;
                break;
            }
            body.extend_from_slice(&line);
            if body.len() > self.max_part + 2 {
                return Err(too_large(body.len(), self.max_part));
            }
        }
        // The CRLF before a delimiter belongs to the delimiter.
        let end = trim_eol(&body).len();
        body.truncate(end);
        if body.is_empty() && self.state == ReadState::Done {
            return Ok(None);
        }
        Ok(Some(body))
    }

    fn classify(&self, line: &[u8]) -> Option<ReadState> {
        let line = trim_eol(line);
        let rest = line.strip_prefix(self.delimiter.as_slice())?;
        match rest {
            b"" => Some(ReadState::AtPart),
            b"--" => Some(ReadState::Done),
            _ => None,
        }
    }
}

fn too_large(len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("multipart part of {len} bytes exceeds the {max} byte limit"),
    )
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Frame source reading a remote MJPEG stream over HTTP.
pub struct MjpegClient {
    url: String,
    parts: MultipartReader<BufReader<Box<dyn Read + Send + Sync + 'static>>>,
    sequence: u32,
}

impl MjpegClient {
    /// Issue the GET and check the response is a multipart stream.
    pub fn connect(url: &str) -> Result<Self, CameraError> {
        let response = ureq::get(url)
            .call()
            .map_err(|e| CameraError::Http(format!("{url}: {e}")))?;

        let content_type = response.header("Content-Type").unwrap_or_default().to_string();
        let boundary = boundary_from_content_type(&content_type).ok_or_else(|| {
            CameraError::Http(format!("{url}: not a multipart stream (Content-Type: {content_type:?})"))
        })?;
        tracing::info!(url, boundary = %boundary, "connected to MJPEG stream");

        let reader = BufReader::new(response.into_reader());
        Ok(Self {
            url: url.to_string(),
            parts: MultipartReader::new(reader, &boundary),
            sequence: 0,
        })
    }
}

impl FrameSource for MjpegClient {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let body = self
            .parts
            .next_part()
            .map_err(|e| CameraError::Http(format!("{}: {e}", self.url)))?
            .ok_or_else(|| CameraError::Http(format!("{}: stream ended", self.url)))?;

        let image = image::load_from_memory_with_format(&body, image::ImageFormat::Jpeg)
            .map_err(|e| CameraError::Decode(e.to_string()))?
            .to_rgb8();
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame::new(image, self.sequence))
    }

    fn describe(&self) -> String {
        format!("mjpeg {}", self.url)
    }
}
