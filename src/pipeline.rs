//! Streaming pipeline orchestration
//!
//! Drives the capture loop and fans each frame out to the local recording
//! and the resilient push channel, then releases everything in order on
//! shutdown, end-of-stream, or fatal push failure.

use crate::capture::{Frame, FrameSource};
use crate::error::{StreamError, StreamResult};
use crate::push::{PushChannel, PushOutcome, Supervisor};
use crate::record::RecordSink;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Events emitted while streaming
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Pipeline entered its capture loop
    Started,
    /// Push rate was lowered after encoder restarts
    Degraded { fps: u32 },
    /// A frame was lost by the push channel (it is in the recording
    /// regardless)
    FrameDropped { index: u64 },
    /// Pipeline finished
    Stopped,
    /// Fatal error
    Error(String),
}

/// Summary of a finished streaming session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    /// Local recording produced by this session
    pub recording: Option<PathBuf>,

    /// Frames pulled from the source
    pub frames_captured: u64,

    /// Frames the push channel had to drop
    pub frames_dropped: u64,

    /// Encoder restarts over the whole session
    pub encoder_restarts: u64,

    /// Wall-clock session length in seconds
    pub duration_secs: f64,
}

/// Hook applied to each frame before it reaches either sink
pub type FrameHook = Box<dyn FnMut(Frame) -> Frame>;

/// Orchestrates one streaming session
pub struct StreamPipeline<F, R, S>
where
    F: FrameSource,
    R: RecordSink,
    S: Supervisor,
{
    source: F,
    recorder: R,
    push: PushChannel<S>,
    shutdown: Arc<AtomicBool>,
    frame_hook: Option<FrameHook>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl<F, R, S> StreamPipeline<F, R, S>
where
    F: FrameSource,
    R: RecordSink,
    S: Supervisor,
{
    /// Create a pipeline over an opened source, recorder and push channel
    pub fn new(source: F, recorder: R, push: PushChannel<S>, shutdown: Arc<AtomicBool>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            source,
            recorder,
            push,
            shutdown,
            frame_hook: None,
            event_tx,
        }
    }

    /// Install a hook applied to each frame before it reaches either sink,
    /// so the durable copy and the pushed copy stay identical.
    pub fn with_frame_hook(mut self, hook: impl FnMut(Frame) -> Frame + 'static) -> Self {
        self.frame_hook = Some(Box::new(hook));
        self
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run the capture loop until end-of-stream, shutdown, or a fatal push
    /// failure.
    pub fn run(mut self) -> StreamResult<PipelineSummary> {
        let started = Instant::now();
        let mut frames_captured: u64 = 0;
        let mut frames_dropped: u64 = 0;

        let _ = self.event_tx.send(PipelineEvent::Started);
        tracing::info!("Streaming started");

        let outcome = loop {
            if self.shutdown_requested() {
                tracing::info!("Shutdown requested, stopping stream");
                break Ok(());
            }

            let Some(frame) = self.source.read_frame() else {
                tracing::info!("Frame source exhausted after {} frames", frames_captured);
                break Ok(());
            };
            frames_captured += 1;

            let frame = match self.frame_hook.as_mut() {
                Some(hook) => hook(frame),
                None => frame,
            };

            // The durable copy gets every frame before the push is
            // attempted, so a push failure never thins the recording.
            if let Err(e) = self.recorder.write_frame(&frame) {
                break Err(StreamError::Recording(e));
            }

            match self.push.push(&frame) {
                PushOutcome::Delivered => {}
                PushOutcome::Degraded(fps) => {
                    tracing::warn!("Push rate degraded to {}fps", fps);
                    let _ = self.event_tx.send(PipelineEvent::Degraded { fps });
                }
                PushOutcome::Dropped => {
                    frames_dropped += 1;
                    tracing::warn!("Frame {} dropped by push channel", frames_captured);
                    let _ = self.event_tx.send(PipelineEvent::FrameDropped {
                        index: frames_captured,
                    });
                }
                PushOutcome::ChannelClosed => {
                    if self.shutdown_requested() {
                        break Ok(());
                    }
                    break Err(StreamError::RetryBudgetExhausted {
                        restarts: self.push.total_restarts(),
                    });
                }
            }
        };

        // Ordered release: source first, then the durable sink, then the
        // push channel.
        self.source.stop();
        let finished = self.recorder.finish();
        self.push.close();

        if let Err(e) = &finished {
            tracing::warn!("Failed to finalize recording: {}", e);
        }

        match outcome {
            Ok(()) => {
                finished.map_err(StreamError::Recording)?;
                let summary = PipelineSummary {
                    recording: self.recorder.output_file(),
                    frames_captured,
                    frames_dropped,
                    encoder_restarts: self.push.total_restarts(),
                    duration_secs: started.elapsed().as_secs_f64(),
                };
                tracing::info!(
                    "Streaming stopped: {} frames in {:.1}s ({} dropped, {} encoder restarts)",
                    summary.frames_captured,
                    summary.duration_secs,
                    summary.frames_dropped,
                    summary.encoder_restarts
                );
                let _ = self.event_tx.send(PipelineEvent::Stopped);
                Ok(summary)
            }
            Err(e) => {
                let _ = self.event_tx.send(PipelineEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }
}
