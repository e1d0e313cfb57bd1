//! Frame sources and the pull-based frame iterator.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use crate::mjpeg::MjpegClient;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Anything that can hand out frames one at a time, blocking until a frame
/// is available.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where frames come from: a local V4L2 device or a remote MJPEG stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSpec {
    /// V4L2 device path, e.g. `/dev/video0`.
    Device(String),
    /// `http(s)://` URL serving `multipart/x-mixed-replace` JPEG frames.
    Url(String),
}

impl FromStr for CameraSpec {
    type Err = String;

    /// `"0"` → `/dev/video0`; `http://…` → URL; anything else is a device path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("camera must be a device index, a device path or a URL".into());
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(CameraSpec::Url(s.to_string()));
        }
        if let Ok(index) = s.parse::<u32>() {
            return Ok(CameraSpec::Device(format!("/dev/video{index}")));
        }
        Ok(CameraSpec::Device(s.to_string()))
    }
}

impl fmt::Display for CameraSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSpec::Device(path) => f.write_str(path),
            CameraSpec::Url(url) => f.write_str(url),
        }
    }
}

/// Open the source named by `spec`. `width`/`height` are requested from
/// local devices; remote streams deliver whatever size they encode.
pub fn open_source(
    spec: &CameraSpec,
    width: u32,
    height: u32,
) -> Result<Box<dyn FrameSource + Send>, CameraError> {
    let source: Box<dyn FrameSource + Send> = match spec {
        CameraSpec::Device(path) => Box::new(Camera::open(path, width, height)?),
        CameraSpec::Url(url) => Box::new(MjpegClient::connect(url)?),
    };
    tracing::info!(source = %source.describe(), "frame source opened");
    Ok(source)
}

/// Cancels a [`Frames`] iterator from outside the loop body.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pull-based iterator over a frame source.
///
/// Yields frames until a read fails; the failure is yielded once and the
/// iterator is then exhausted. A stopped [`StopHandle`] ends it before the
/// next read.
pub struct Frames<S> {
    source: S,
    stop: StopHandle,
    failed: bool,
}

impl<S: FrameSource> Frames<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            stop: StopHandle::default(),
            failed: false,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Release the iterator and return the source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S: FrameSource> Iterator for Frames<S> {
    type Item = Result<Frame, CameraError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.stop.is_stopped() {
            return None;
        }
        match self.source.next_frame() {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: FrameSource> std::iter::FusedIterator for Frames<S> {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;

    /// Produces `limit` blank frames, then fails.
    pub(crate) struct Synthetic {
        pub produced: u32,
        pub limit: u32,
    }

    impl FrameSource for Synthetic {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.produced >= self.limit {
                return Err(CameraError::CaptureFailed("synthetic source exhausted".into()));
            }
            self.produced += 1;
            Ok(Frame::new(RgbImage::new(4, 4), self.produced))
        }

        fn describe(&self) -> String {
            "synthetic".into()
        }
    }

    #[test]
    fn test_camera_spec_parsing() {
        assert_eq!("0".parse(), Ok(CameraSpec::Device("/dev/video0".into())));
        assert_eq!("/dev/video2".parse(), Ok(CameraSpec::Device("/dev/video2".into())));
        assert_eq!(
            "http://pi.local:5000/video_feed".parse(),
            Ok(CameraSpec::Url("http://pi.local:5000/video_feed".into()))
        );
        assert!("  ".parse::<CameraSpec>().is_err());
    }

    #[test]
    fn test_frames_yield_error_once_then_end() {
        let mut frames = Frames::new(Synthetic { produced: 0, limit: 2 });
        assert_eq!(frames.next().unwrap().unwrap().sequence, 1);
        assert_eq!(frames.next().unwrap().unwrap().sequence, 2);
        assert!(matches!(frames.next(), Some(Err(CameraError::CaptureFailed(_)))));
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_stop_handle_ends_iteration_without_reading() {
        let mut frames = Frames::new(Synthetic { produced: 0, limit: 100 });
        let stop = frames.stop_handle();
        assert!(frames.next().is_some());
        stop.stop();
        assert!(frames.next().is_none());
        assert_eq!(frames.into_inner().produced, 1);
    }

    #[test]
    fn test_boxed_source_iterates() {
        let boxed: Box<dyn FrameSource + Send> = Box::new(Synthetic { produced: 0, limit: 3 });
        let ok = Frames::new(boxed).take_while(|r| r.is_ok()).count();
        assert_eq!(ok, 3);
    }
}
