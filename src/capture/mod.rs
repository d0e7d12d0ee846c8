//! Capture sources
//!
//! Frame and geometry types plus the camera-backed frame source.

pub mod camera;
pub mod types;

pub use camera::{list_cameras, CameraSource};
pub use types::{Frame, FrameSource, PixelFormat, StreamGeometry};
