//! V4L2 capture devices.
//!
//! A [`Camera`] negotiates one of a handful of pixel formats at open time,
//! keeps a single mmap stream alive for its whole life and hands out RGB
//! frames.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use serde::Serialize;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;
const PROBED_NODES: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no such capture device: {0}")]
    DeviceNotFound(String),
    #[error("frame capture: {0}")]
    CaptureFailed(String),
    #[error("device is held by another process")]
    DeviceBusy,
    #[error("no usable pixel format: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
    #[error("http source failed: {0}")]
    Http(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// A capture node as reported by `devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    /// Card name, e.g. "HD Webcam".
    pub name: String,
    pub driver: String,
    pub bus: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, two bytes per pixel.
    Yuyv,
    /// One JPEG per buffer.
    Mjpg,
    Rgb3,
    Grey,
    /// Four bytes per pixel, B G R then padding.
    Bgrx,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        let format = match &fourcc.repr {
            b"YUYV" => Self::Yuyv,
            b"MJPG" => Self::Mjpg,
            b"RGB3" => Self::Rgb3,
            b"GREY" => Self::Grey,
            b"XR24" | b"BGR4" => Self::Bgrx,
            _ => return None,
        };
        Some(format)
    }
}

/// What the driver agreed to.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    width: u32,
    height: u32,
    format: PixelFormat,
}

pub struct Camera {
    path: String,
    device: Device,
    geometry: Geometry,
    stream: Option<MmapStream<'static>>,
}

impl Camera {
    /// Open `device_path` and ask for `width`×`height` YUYV. Drivers are free
    /// to answer with another size or format; anything [`PixelFormat`] covers
    /// is accepted.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }
        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("VIDIOC_QUERYCAP on {device_path}: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let geometry = negotiate(&device, width, height)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = geometry.width,
            height = geometry.height,
            format = ?geometry.format,
            "camera ready"
        );

        Ok(Self {
            path: device_path.to_string(),
            device,
            geometry,
            stream: None,
        })
    }

    /// Block for the next buffer and convert it to RGB. The stream is
    /// created on the first call.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("mmap stream setup: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("mmap stream missing".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
        let filled = &buf[..(meta.bytesused as usize).min(buf.len())];
        let Geometry { width, height, format } = self.geometry;
        Ok(Frame::new(convert(format, filled, width, height)?, meta.sequence))
    }

    /// Capture-capable nodes among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..PROBED_NODES)
            .map(|n| format!("/dev/video{n}"))
            .filter_map(|path| {
                let caps = Device::with_path(&path).and_then(|d| d.query_caps()).ok()?;
                if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

fn open_error(path: &str, e: io::Error) -> CameraError {
    if e.raw_os_error() == Some(EBUSY) {
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{path}: {e}"))
    }
}

fn negotiate(device: &Device, width: u32, height: u32) -> Result<Geometry, CameraError> {
    let failed = |step: &str, e: io::Error| CameraError::FormatNegotiationFailed(format!("{step}: {e}"));

    let mut wanted = device.format().map_err(|e| failed("VIDIOC_G_FMT", e))?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = width;
    wanted.height = height;
    let got = device.set_format(&wanted).map_err(|e| failed("VIDIOC_S_FMT", e))?;

    let format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!("driver offered {:?}, supported are YUYV MJPG RGB3 GREY XR24", got.fourcc))
    })?;
    if got.width != width || got.height != height {
        tracing::debug!(width = got.width, height = got.height, "driver changed the frame size");
    }

    Ok(Geometry {
        width: got.width,
        height: got.height,
        format,
    })
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn describe(&self) -> String {
        let Geometry { width, height, format } = self.geometry;
        format!("{} ({width}x{height} {format:?})", self.path)
    }
}

/// Convert one raw buffer in `format` to an RGB image.
fn convert(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<image::RgbImage, CameraError> {
    let failed = |e: frame::FrameError| CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}"));
    match format {
        PixelFormat::Yuyv => frame::rgb_image(frame::yuyv_to_rgb(buf, width, height).map_err(failed)?, width, height)
            .map_err(failed),
        PixelFormat::Grey => frame::rgb_image(frame::grey_to_rgb(buf, width, height).map_err(failed)?, width, height)
            .map_err(failed),
        PixelFormat::Bgrx => frame::rgb_image(frame::bgrx_to_rgb(buf, width, height).map_err(failed)?, width, height)
            .map_err(failed),
        PixelFormat::Rgb3 => {
            let len = (width * height * 3) as usize;
            let pixels = buf.get(..len).ok_or_else(|| {
                failed(frame::FrameError::InvalidLength { expected: len, actual: buf.len() })
            })?;
            frame::rgb_image(pixels.to_vec(), width, height).map_err(failed)
        }
        PixelFormat::Mjpg => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| CameraError::Decode(e.to_string())),
    }
}
