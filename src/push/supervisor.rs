//! Encoder process supervision
//!
//! Owns the lifecycle of the external FFmpeg process that encodes raw
//! frames and pushes them to the RTSP destination: spawn, write, liveness,
//! bounded termination. One OS child process and one writable pipe per
//! handle; failures are surfaced undecorated for the push channel to act on.

use crate::capture::{PixelFormat, StreamGeometry};
use crate::config::RtspTransport;
use crate::error::PushError;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::{Duration, Instant};

/// How long `terminate` waits for the child to exit after EOF before
/// killing it.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for the child to exit
const TERMINATE_POLL: Duration = Duration::from_millis(50);

/// One live connection to an encoder/transport process
pub trait EncoderLink {
    /// Write one frame's raw bytes and flush. Never retried here; failures
    /// surface to the caller as-is.
    fn write_frame(&mut self, data: &[u8]) -> Result<(), PushError>;

    /// Whether the process is still running (non-blocking)
    fn is_alive(&mut self) -> bool;

    /// Ask the process to exit and reap it, waiting a bounded time.
    /// Idempotent; an already-exited process counts as success.
    fn terminate(&mut self);
}

/// Spawns encoder processes for a fixed session geometry
pub trait Supervisor {
    type Link: EncoderLink;

    /// Launch an encoder configured for `rate` frames per second
    fn spawn(&mut self, rate: u32) -> Result<Self::Link, PushError>;
}

/// Build the FFmpeg argv for a raw-stdin to RTSP push
fn push_args(
    destination: &str,
    transport: RtspTransport,
    geometry: &StreamGeometry,
    pixel_format: PixelFormat,
    rate: u32,
) -> Vec<String> {
    vec![
        "-y".into(),
        "-an".into(),
        "-f".into(),
        "rawvideo".into(),
        "-vcodec".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        pixel_format.ffmpeg_name().into(),
        "-s".into(),
        format!("{}x{}", geometry.width, geometry.height),
        "-r".into(),
        rate.to_string(),
        "-i".into(),
        "-".into(), // stdin for raw frames
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-max_delay".into(),
        "0".into(),
        "-bufsize".into(),
        "100k".into(),
        "-f".into(),
        "rtsp".into(),
        "-rtsp_transport".into(),
        transport.as_str().into(),
        destination.into(),
    ]
}

/// Handle to a spawned encoder process
pub struct EncoderProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl EncoderLink for EncoderProcess {
    fn write_frame(&mut self, data: &[u8]) -> Result<(), PushError> {
        let stdin = match self.stdin.as_mut() {
            Some(stdin) => stdin,
            None => {
                return Err(PushError::Transport {
                    broken_pipe: true,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "encoder stdin closed"),
                })
            }
        };

        stdin
            .write_all(data)
            .and_then(|_| stdin.flush())
            .map_err(|e| PushError::Transport {
                broken_pipe: e.kind() == io::ErrorKind::BrokenPipe,
                source: e,
            })
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        // EOF on stdin lets FFmpeg flush its mux queue before exiting.
        drop(self.stdin.take());

        let deadline = Instant::now() + TERMINATE_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Encoder process exited with status {}", status);
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(TERMINATE_POLL);
                }
                Err(e) => {
                    tracing::warn!("Error waiting for encoder process: {}", e);
                    break;
                }
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Supervisor for FFmpeg push processes
///
/// Each spawn produces a fresh process wired for the session geometry at
/// the requested input rate. The binary name is a field so spawn failures
/// can be exercised without FFmpeg installed.
pub struct EncoderSupervisor {
    binary: String,
    destination: String,
    transport: RtspTransport,
    geometry: StreamGeometry,
    pixel_format: PixelFormat,
}

impl EncoderSupervisor {
    /// Create a supervisor pushing to `destination`
    pub fn new(
        destination: impl Into<String>,
        transport: RtspTransport,
        geometry: StreamGeometry,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            destination: destination.into(),
            transport,
            geometry,
            pixel_format,
        }
    }

    /// Override the encoder binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Supervisor for EncoderSupervisor {
    type Link = EncoderProcess;

    fn spawn(&mut self, rate: u32) -> Result<EncoderProcess, PushError> {
        let args = push_args(
            &self.destination,
            self.transport,
            &self.geometry,
            self.pixel_format,
            rate,
        );

        tracing::info!("Starting encoder: {} {:?}", self.binary, args);

        // stdout/stderr are diagnostic only and never part of the data
        // contract, so they are discarded rather than piped.
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PushError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            PushError::Spawn(io::Error::new(
                io::ErrorKind::Other,
                "failed to capture encoder stdin",
            ))
        })?;

        Ok(EncoderProcess {
            child,
            stdin: Some(stdin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> StreamGeometry {
        StreamGeometry {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }

    #[test]
    fn test_push_args_cover_geometry_rate_and_destination() {
        let args = push_args(
            "rtsp://host:8554/stream",
            RtspTransport::Tcp,
            &geometry(),
            PixelFormat::Bgr24,
            25,
        );

        assert!(args.windows(2).any(|w| w == ["-s", "1280x720"]));
        assert!(args.windows(2).any(|w| w == ["-r", "25"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "bgr24"]));
        assert!(args.windows(2).any(|w| w == ["-rtsp_transport", "tcp"]));
        assert_eq!(args.last().map(String::as_str), Some("rtsp://host:8554/stream"));
    }

    #[test]
    fn test_push_args_low_latency_tuning() {
        let args = push_args(
            "rtsp://host/stream",
            RtspTransport::Udp,
            &geometry(),
            PixelFormat::Yuyv422,
            30,
        );

        assert!(args.windows(2).any(|w| w == ["-tune", "zerolatency"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "ultrafast"]));
        assert!(args.windows(2).any(|w| w == ["-rtsp_transport", "udp"]));
    }

    #[test]
    fn test_spawn_missing_binary_is_a_spawn_error() {
        let mut supervisor = EncoderSupervisor::new(
            "rtsp://host/stream",
            RtspTransport::Tcp,
            geometry(),
            PixelFormat::Yuyv422,
        )
        .with_binary("camcast-test-no-such-binary");

        match supervisor.spawn(30) {
            Err(PushError::Spawn(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected spawn error, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    fn spawn_sink() -> EncoderProcess {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        EncoderProcess {
            child,
            stdin: Some(stdin),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_link_write_then_terminate() {
        let mut link = spawn_sink();
        assert!(link.is_alive());
        link.write_frame(&[0u8; 64]).unwrap();
        link.terminate();
        assert!(!link.is_alive());
        // Idempotent on an already-exited process.
        link.terminate();
    }

    #[cfg(unix)]
    #[test]
    fn test_write_to_exited_process_is_broken_pipe() {
        let mut child = Command::new("true").stdin(Stdio::piped()).spawn().unwrap();
        let stdin = child.stdin.take().unwrap();
        let mut link = EncoderProcess {
            child,
            stdin: Some(stdin),
        };

        // Wait for the process to exit so the read end of the pipe is gone.
        while link.is_alive() {
            std::thread::sleep(Duration::from_millis(10));
        }

        match link.write_frame(&[0u8; 64]) {
            Err(PushError::Transport { broken_pipe, .. }) => assert!(broken_pipe),
            other => panic!("expected transport failure, got {:?}", other.map(|_| ())),
        }
    }
}
