//! lookout-hw — frame sources for the capture loop and the stream server.
//!
//! V4L2 capture through the `v4l` crate, remote `multipart/x-mixed-replace`
//! JPEG streams over HTTP, and the multipart framing both sides share.

pub mod camera;
pub mod frame;
pub mod mjpeg;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use mjpeg::MjpegClient;
pub use source::{open_source, CameraSpec, FrameSource, Frames, StopHandle};
