//! Stream configuration
//!
//! Configuration consumed by the pipeline: where the stream is pushed,
//! which device is captured, where recordings land, and the restart policy.

use crate::push::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport mode for the RTSP push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
}

impl RtspTransport {
    /// Value passed to FFmpeg's `-rtsp_transport`
    pub fn as_str(&self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
        }
    }
}

impl Default for RtspTransport {
    fn default() -> Self {
        Self::Tcp
    }
}

/// Configuration for a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// RTSP URL the encoded stream is pushed to
    pub push_url: String,

    /// RTSP transport mode
    #[serde(default)]
    pub transport: RtspTransport,

    /// Camera id or index (None = first camera)
    pub device: Option<String>,

    /// Directory local recordings are written into
    pub output_dir: PathBuf,

    /// Restart/backoff policy for the push channel
    #[serde(default)]
    pub retry: RetryPolicy,
}
