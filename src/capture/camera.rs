//! Webcam capture using nokhwa
//!
//! Opens a camera device, fixes the session geometry from what the device
//! actually negotiated, and delivers raw frames in the camera's native
//! pixel format. FFmpeg handles format conversion downstream.

use crate::capture::types::{Frame, FrameSource, PixelFormat, StreamGeometry};
use crate::error::CaptureError;
use chrono::Utc;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Get the (id, name) pairs of connected cameras
pub fn list_cameras() -> Vec<(String, String)> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .map(|info| {
                let id = match info.index() {
                    CameraIndex::Index(i) => i.to_string(),
                    CameraIndex::String(s) => s.to_string(),
                };
                (id, info.human_name().to_string())
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Camera-backed frame source
pub struct CameraSource {
    camera: Camera,
    geometry: StreamGeometry,
    pixel_format: PixelFormat,
    stopped: bool,
    first_frame_logged: bool,
}

impl CameraSource {
    /// Open a camera by id/index (None = first camera) and start streaming.
    ///
    /// The session geometry is whatever the device negotiated, not what was
    /// requested; it does not change until the source is stopped.
    pub fn open(device: Option<&str>) -> Result<Self, CaptureError> {
        let index = match device {
            Some(id) => match id.parse::<u32>() {
                Ok(i) => CameraIndex::Index(i),
                Err(_) => CameraIndex::String(id.to_string()),
            },
            None => CameraIndex::Index(0),
        };

        let format =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera =
            Camera::new(index, format).map_err(|e| CaptureError::Open(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        let camera_format = camera.camera_format();
        let geometry = StreamGeometry {
            width: camera_format.resolution().width(),
            height: camera_format.resolution().height(),
            frame_rate: camera_format.frame_rate(),
        };

        let pixel_format = match camera_format.format() {
            FrameFormat::YUYV => PixelFormat::Yuyv422,
            FrameFormat::NV12 => PixelFormat::Nv12,
            FrameFormat::RAWRGB => PixelFormat::Rgb24,
            FrameFormat::MJPEG => PixelFormat::Mjpeg,
            other => {
                tracing::warn!("Unknown camera format {:?}, assuming yuyv422", other);
                PixelFormat::Yuyv422
            }
        };

        tracing::info!(
            "Camera opened: {}x{} @ {}fps, format={}",
            geometry.width,
            geometry.height,
            geometry.frame_rate,
            pixel_format.ffmpeg_name()
        );

        Ok(Self {
            camera,
            geometry,
            pixel_format,
            stopped: false,
            first_frame_logged: false,
        })
    }
}

impl FrameSource for CameraSource {
    fn geometry(&self) -> StreamGeometry {
        self.geometry
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn read_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }

        // Blocks until the camera delivers the next frame; the device is
        // the pacing mechanism for the whole pipeline.
        match self.camera.frame() {
            Ok(frame) => {
                let data = frame.buffer().to_vec();
                if !self.first_frame_logged {
                    self.first_frame_logged = true;
                    let expected = self
                        .pixel_format
                        .frame_len(self.geometry.width, self.geometry.height);
                    tracing::info!(
                        "First frame: {} bytes (expected {:?} for {})",
                        data.len(),
                        expected,
                        self.pixel_format.ffmpeg_name()
                    );
                }
                Some(Frame {
                    width: self.geometry.width,
                    height: self.geometry.height,
                    pixel_format: self.pixel_format,
                    data,
                    captured_at: Utc::now(),
                })
            }
            Err(e) => {
                // A device that stops delivering frames ends the stream.
                tracing::warn!("Camera stopped delivering frames: {:?}", e);
                None
            }
        }
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Error stopping camera stream: {:?}", e);
        }
    }
}
