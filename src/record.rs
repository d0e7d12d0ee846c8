//! Local recording
//!
//! The durable copy of a capture session: one timestamp-named MP4 per
//! session, produced by piping raw frames to an FFmpeg child that handles
//! encoding and muxing.

use crate::capture::{Frame, PixelFormat, StreamGeometry};
use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Append-only sink for the durable copy of a session
pub trait RecordSink {
    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()>;

    /// Flush buffered frames and close the output file
    fn finish(&mut self) -> io::Result<()>;

    /// Path of the file this sink writes, if it writes one
    fn output_file(&self) -> Option<PathBuf> {
        None
    }
}

/// File name for a session started at `started_at`
fn recording_file_name(started_at: DateTime<Utc>) -> String {
    format!("{}_raw.mp4", started_at.format("%Y%m%d_%H%M%S"))
}

/// Build the FFmpeg argv that muxes raw stdin frames into an MP4 file
fn recorder_args(geometry: &StreamGeometry, pixel_format: PixelFormat, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        pixel_format.ffmpeg_name().into(),
        "-video_size".into(),
        format!("{}x{}", geometry.width, geometry.height),
        "-framerate".into(),
        geometry.frame_rate.to_string(),
        "-i".into(),
        "-".into(), // stdin for raw frames
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// MP4 recorder backed by an FFmpeg child process
#[derive(Debug)]
pub struct Mp4Recorder {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    frames_written: u64,
}

impl Mp4Recorder {
    /// Start a recorder writing into `output_dir`, named from the session
    /// start time.
    pub fn create(
        output_dir: &Path,
        geometry: &StreamGeometry,
        pixel_format: PixelFormat,
    ) -> io::Result<Self> {
        Self::create_with_binary("ffmpeg", output_dir, geometry, pixel_format)
    }

    fn create_with_binary(
        binary: &str,
        output_dir: &Path,
        geometry: &StreamGeometry,
        pixel_format: PixelFormat,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(recording_file_name(Utc::now()));

        let mut process = Command::new(binary)
            .args(recorder_args(geometry, pixel_format, &path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = process.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "failed to capture recorder stdin")
        })?;

        tracing::info!(
            "Recording to {:?} ({}x{} @ {}fps)",
            path,
            geometry.width,
            geometry.height,
            geometry.frame_rate
        );

        Ok(Self {
            process: Some(process),
            stdin: Some(stdin),
            path,
            frames_written: 0,
        })
    }

    /// Frames appended so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl RecordSink for Mp4Recorder {
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "recorder already finished")
        })?;
        stdin.write_all(&frame.data)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        // EOF on stdin lets FFmpeg finalize the container.
        drop(self.stdin.take());

        if let Some(process) = self.process.take() {
            let output = process.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    "Recorder FFmpeg exited with status {}: {}",
                    output.status,
                    stderr
                );
            }
            tracing::info!(
                "Recording finished: {} frames to {:?}",
                self.frames_written,
                self.path
            );
        }
        Ok(())
    }

    fn output_file(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

impl Drop for Mp4Recorder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}
