//! Capture data types
//!
//! Frame and geometry types shared by capture sources and sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw pixel layout delivered by a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuyv422,
    Nv12,
    Rgb24,
    Bgr24,
    Rgba,
    Mjpeg,
}

impl PixelFormat {
    /// Name FFmpeg uses for this layout (`-pix_fmt` / `-pixel_format`)
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Yuyv422 => "yuyv422",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Mjpeg => "mjpeg",
        }
    }

    /// Expected byte length of one frame, for layouts with a fixed size.
    /// MJPEG frames are entropy-coded and have no fixed size.
    pub fn frame_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize) * (height as usize);
        match self {
            PixelFormat::Yuyv422 => Some(pixels * 2),
            PixelFormat::Nv12 => Some(pixels * 3 / 2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Rgba => Some(pixels * 4),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Fixed geometry of a capture session
///
/// Negotiated once when the source is opened and passed unchanged to every
/// encoder process spawned during the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGeometry {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Nominal frame rate
    pub frame_rate: u32,
}

/// One raw image sample
///
/// Frames are immutable once captured; sinks receive them by reference.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Raw layout of `data`
    pub pixel_format: PixelFormat,

    /// Raw frame bytes as delivered by the device
    pub data: Vec<u8>,

    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
}

/// A blocking source of raw frames
///
/// Geometry and pixel format are fixed once the source is open;
/// `read_frame` returning `None` means the stream has ended.
pub trait FrameSource {
    /// Session geometry, fixed after open
    fn geometry(&self) -> StreamGeometry;

    /// Raw layout of the frames this source produces
    fn pixel_format(&self) -> PixelFormat;

    /// Block until the next frame, or `None` at end-of-stream
    fn read_frame(&mut self) -> Option<Frame>;

    /// Release the underlying device
    fn stop(&mut self);
}
