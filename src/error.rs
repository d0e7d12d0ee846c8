//! Error types and handling
//!
//! Common error types used across the streaming pipeline.

use thiserror::Error;

/// Errors raised while opening a capture device.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open camera: {0}")]
    Open(String),

    #[error("failed to start camera stream: {0}")]
    Stream(String),
}

/// Errors surfaced by the push transport layer.
///
/// Both variants are recoverable inside the push channel up to the restart
/// budget; they only escape it on session startup.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("failed to start encoder process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transport write failed (broken_pipe={broken_pipe}): {source}")]
    Transport {
        broken_pipe: bool,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("recording error: {0}")]
    Recording(#[from] std::io::Error),

    #[error("push error: {0}")]
    Push(#[from] PushError),

    #[error("push channel closed: encoder restart budget exhausted after {restarts} restarts")]
    RetryBudgetExhausted { restarts: u64 },
}

/// Result type alias using StreamError
pub type StreamResult<T> = Result<T, StreamError>;
