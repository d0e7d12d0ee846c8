//! Resilient push channel
//!
//! Delivers the capture stream to the network sink, surviving transport
//! failures: terminate the encoder, back off, respawn at a degraded frame
//! rate, retry the failed frame once, and give up for good when the
//! consecutive-restart budget is exhausted. The capture loop never sees a
//! transport failure directly; it only observes the push outcome.

use crate::capture::Frame;
use crate::error::PushError;
use crate::push::policy::RetryPolicy;
use crate::push::supervisor::{EncoderLink, Supervisor};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll interval of the interruptible backoff sleep
const BACKOFF_POLL: Duration = Duration::from_millis(50);

/// Outcome of pushing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame reached the encoder
    Delivered,

    /// Frame reached the encoder after a restart lowered the target rate;
    /// reported once per rate change
    Degraded(u32),

    /// Frame was lost: the single retry after a restart also failed
    Dropped,

    /// The restart budget is exhausted or the channel was closed; no
    /// further I/O will be attempted
    ChannelClosed,
}

/// Channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// Writes are forwarded to the live encoder process
    Streaming,

    /// An encoder restart is in progress
    Recovering,

    /// Terminal; entered when the budget runs out or on `close`
    Terminated,
}

/// Resilient frame channel to a supervised encoder process
///
/// Exactly one encoder process is owned at a time; nothing else may write
/// to or terminate it. All counters are private session state, so the
/// channel needs no locking.
pub struct PushChannel<S: Supervisor> {
    supervisor: S,
    policy: RetryPolicy,
    nominal_fps: u32,
    state: PushState,
    link: Option<S::Link>,
    effective_fps: u32,
    reported_fps: u32,
    consecutive_failures: u32,
    total_restarts: u64,
    shutdown: Arc<AtomicBool>,
}

impl<S: Supervisor> PushChannel<S> {
    /// Spawn the initial encoder at the nominal rate and open the channel.
    ///
    /// A spawn failure here is a session startup failure; the restart
    /// budget only applies once the channel is live.
    pub fn open(
        mut supervisor: S,
        nominal_fps: u32,
        policy: RetryPolicy,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, PushError> {
        let link = supervisor.spawn(nominal_fps)?;
        Ok(Self {
            supervisor,
            policy,
            nominal_fps,
            state: PushState::Streaming,
            link: Some(link),
            effective_fps: nominal_fps,
            reported_fps: nominal_fps,
            consecutive_failures: 0,
            total_restarts: 0,
            shutdown,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> PushState {
        self.state
    }

    /// Frame rate the current encoder was spawned with
    pub fn effective_fps(&self) -> u32 {
        self.effective_fps
    }

    /// Encoder restarts over the life of the channel
    pub fn total_restarts(&self) -> u64 {
        self.total_restarts
    }

    /// Deliver one frame to the encoder, restarting it on failure.
    pub fn push(&mut self, frame: &Frame) -> PushOutcome {
        if self.state == PushState::Terminated {
            return PushOutcome::ChannelClosed;
        }

        match self.try_write(frame) {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.report_delivery()
            }
            Err(e) => {
                tracing::warn!("Transport failure: {}", e);
                self.recover(frame)
            }
        }
    }

    /// Force the channel into its terminal state and release the encoder.
    /// Safe to call multiple times.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.terminate();
        }
        self.state = PushState::Terminated;
    }

    fn try_write(&mut self, frame: &Frame) -> Result<(), PushError> {
        let link = match self.link.as_mut() {
            Some(link) => link,
            None => {
                return Err(PushError::Transport {
                    broken_pipe: true,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "no live encoder"),
                })
            }
        };

        // A process that already exited fails the frame without touching
        // the pipe.
        if !link.is_alive() {
            return Err(PushError::Transport {
                broken_pipe: true,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "encoder process exited"),
            });
        }

        link.write_frame(&frame.data)
    }

    /// Successful delivery: surface a pending rate change exactly once.
    fn report_delivery(&mut self) -> PushOutcome {
        if self.effective_fps != self.reported_fps {
            self.reported_fps = self.effective_fps;
            PushOutcome::Degraded(self.effective_fps)
        } else {
            PushOutcome::Delivered
        }
    }

    /// Restart sequence after a transport failure.
    ///
    /// Spawn failures and write failures share one budget: every pass of
    /// the loop burns one consecutive-failure credit, and only a delivered
    /// frame ever refunds them.
    fn recover(&mut self, frame: &Frame) -> PushOutcome {
        self.state = PushState::Recovering;

        loop {
            if let Some(mut link) = self.link.take() {
                link.terminate();
            }

            if !self.backoff() {
                // Shutdown requested mid-recovery; close instead of
                // burning the rest of the budget.
                tracing::info!("Shutdown during encoder recovery");
                self.state = PushState::Terminated;
                return PushOutcome::ChannelClosed;
            }

            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.policy.max_consecutive_restarts {
                tracing::error!(
                    "Encoder restart budget exhausted after {} consecutive failures",
                    self.consecutive_failures
                );
                self.state = PushState::Terminated;
                return PushOutcome::ChannelClosed;
            }

            self.total_restarts += 1;
            self.effective_fps = self
                .policy
                .degraded_rate(self.nominal_fps, self.consecutive_failures);

            tracing::info!(
                "Restarting encoder (attempt {}, {}fps)",
                self.consecutive_failures,
                self.effective_fps
            );

            match self.supervisor.spawn(self.effective_fps) {
                Err(e) => {
                    tracing::warn!("Encoder respawn failed: {}", e);
                    continue;
                }
                Ok(link) => {
                    self.link = Some(link);

                    // Retry the frame that triggered the failure, once. A
                    // second failure drops it; buffering stale frames has
                    // no value in a real-time stream.
                    match self.try_write(frame) {
                        Ok(()) => {
                            self.consecutive_failures = 0;
                            self.state = PushState::Streaming;
                            return self.report_delivery();
                        }
                        Err(e) => {
                            tracing::warn!("Retry after restart failed, dropping frame: {}", e);
                            self.state = PushState::Streaming;
                            return PushOutcome::Dropped;
                        }
                    }
                }
            }
        }
    }

    /// Interruptible backoff sleep. Returns false if shutdown was
    /// requested while waiting.
    fn backoff(&self) -> bool {
        let deadline = Instant::now() + self.policy.backoff();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(BACKOFF_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Shared script/observation state for the fake supervisor
    #[derive(Default)]
    struct Script {
        /// Upcoming write results; exhausted = delivered
        write_results: VecDeque<bool>,
        /// Upcoming spawn results; exhausted = success
        spawn_results: VecDeque<bool>,
        /// Whether links report the process as running
        dead: bool,
        /// Rates passed to every spawn attempt
        spawn_rates: Vec<u32>,
        writes: u32,
        terminates: u32,
    }

    struct FakeLink(Rc<RefCell<Script>>);

    impl EncoderLink for FakeLink {
        fn write_frame(&mut self, _data: &[u8]) -> Result<(), PushError> {
            let mut script = self.0.borrow_mut();
            script.writes += 1;
            if script.write_results.pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(PushError::Transport {
                    broken_pipe: true,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"),
                })
            }
        }

        fn is_alive(&mut self) -> bool {
            !self.0.borrow().dead
        }

        fn terminate(&mut self) {
            self.0.borrow_mut().terminates += 1;
        }
    }

    struct FakeSupervisor(Rc<RefCell<Script>>);

    impl Supervisor for FakeSupervisor {
        type Link = FakeLink;

        fn spawn(&mut self, rate: u32) -> Result<FakeLink, PushError> {
            let mut script = self.0.borrow_mut();
            script.spawn_rates.push(rate);
            if script.spawn_results.pop_front().unwrap_or(true) {
                Ok(FakeLink(self.0.clone()))
            } else {
                Err(PushError::Spawn(io::Error::new(
                    io::ErrorKind::NotFound,
                    "scripted spawn failure",
                )))
            }
        }
    }

    fn frame() -> Frame {
        Frame {
            width: 4,
            height: 4,
            pixel_format: PixelFormat::Rgb24,
            data: vec![0; 48],
            captured_at: Utc::now(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_consecutive_restarts: 3,
            backoff_ms: 0,
            floor_fps: 5,
            degradation_step: 5,
        }
    }

    fn open_channel(
        script: Script,
        policy: RetryPolicy,
    ) -> (PushChannel<FakeSupervisor>, Rc<RefCell<Script>>) {
        let script = Rc::new(RefCell::new(script));
        let channel = PushChannel::open(
            FakeSupervisor(script.clone()),
            30,
            policy,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        (channel, script)
    }

    #[test]
    fn test_clean_stream_delivers_every_frame() {
        let (mut channel, script) = open_channel(Script::default(), policy());
        let frame = frame();

        for _ in 0..100 {
            assert_eq!(channel.push(&frame), PushOutcome::Delivered);
        }

        assert_eq!(channel.total_restarts(), 0);
        assert_eq!(channel.state(), PushState::Streaming);
        assert_eq!(script.borrow().writes, 100);
        assert_eq!(script.borrow().spawn_rates, vec![30]);
    }

    #[test]
    fn test_recovery_degrades_rate_and_redelivers_the_failed_frame() {
        let script = Script {
            write_results: VecDeque::from([false]),
            ..Script::default()
        };
        let (mut channel, script) = open_channel(script, policy());
        let frame = frame();

        assert_eq!(channel.push(&frame), PushOutcome::Degraded(25));
        assert_eq!(channel.total_restarts(), 1);
        assert_eq!(channel.state(), PushState::Streaming);
        // Failed write plus the retry on the fresh encoder.
        assert_eq!(script.borrow().writes, 2);
        assert_eq!(script.borrow().spawn_rates, vec![30, 25]);
        assert_eq!(script.borrow().terminates, 1);

        assert_eq!(channel.push(&frame), PushOutcome::Delivered);
    }

    #[test]
    fn test_counter_resets_only_on_delivery() {
        // Two separate failures with a delivered retry in between must
        // degrade by one step each time, not accumulate.
        let script = Script {
            write_results: VecDeque::from([false, true, true, false]),
            ..Script::default()
        };
        let (mut channel, script) = open_channel(script, policy());
        let frame = frame();

        assert_eq!(channel.push(&frame), PushOutcome::Degraded(25));
        assert_eq!(channel.push(&frame), PushOutcome::Delivered);
        // Second failure lands back on 25, which was already reported.
        assert_eq!(channel.push(&frame), PushOutcome::Delivered);
        assert_eq!(script.borrow().spawn_rates, vec![30, 25, 25]);
    }

    #[test]
    fn test_budget_exhaustion_terminates_the_channel() {
        let script = Script {
            write_results: VecDeque::from(vec![false; 16]),
            ..Script::default()
        };
        let (mut channel, script) = open_channel(script, policy());
        let frame = frame();

        assert_eq!(channel.push(&frame), PushOutcome::Dropped);
        assert_eq!(channel.push(&frame), PushOutcome::Dropped);
        assert_eq!(channel.push(&frame), PushOutcome::ChannelClosed);
        assert_eq!(channel.state(), PushState::Terminated);

        // Restarts never exceed the configured maximum.
        assert!(channel.total_restarts() < 3);

        // Terminal state attempts no further I/O.
        let writes = script.borrow().writes;
        let spawns = script.borrow().spawn_rates.len();
        assert_eq!(channel.push(&frame), PushOutcome::ChannelClosed);
        assert_eq!(script.borrow().writes, writes);
        assert_eq!(script.borrow().spawn_rates.len(), spawns);
    }

    #[test]
    fn test_spawn_failures_share_the_restart_budget() {
        let script = Script {
            write_results: VecDeque::from([false]),
            // Initial spawn succeeds, every respawn fails.
            spawn_results: VecDeque::from([true, false, false, false]),
            ..Script::default()
        };
        let (mut channel, _script) = open_channel(script, policy());

        assert_eq!(channel.push(&frame()), PushOutcome::ChannelClosed);
        assert_eq!(channel.state(), PushState::Terminated);
    }

    #[test]
    fn test_degraded_reported_once_per_rate_change() {
        // A huge step pins the rate to the floor on the first restart; the
        // second recovery keeps the same rate and reports plain delivery.
        let p = RetryPolicy {
            max_consecutive_restarts: 5,
            backoff_ms: 0,
            floor_fps: 5,
            degradation_step: 50,
        };
        let script = Script {
            write_results: VecDeque::from([false, true, false, true]),
            ..Script::default()
        };
        let (mut channel, _script) = open_channel(script, p);
        let frame = frame();

        assert_eq!(channel.push(&frame), PushOutcome::Degraded(5));
        assert_eq!(channel.push(&frame), PushOutcome::Delivered);
    }

    #[test]
    fn test_dead_process_fails_without_writing() {
        let script = Script {
            dead: true,
            ..Script::default()
        };
        let (mut channel, script) = open_channel(script, policy());

        // Every link reports dead, so the retry also fails and the frame
        // is dropped without a single pipe write.
        assert_eq!(channel.push(&frame()), PushOutcome::Dropped);
        assert_eq!(script.borrow().writes, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut channel, script) = open_channel(Script::default(), policy());

        channel.close();
        channel.close();
        assert_eq!(channel.state(), PushState::Terminated);
        assert_eq!(script.borrow().terminates, 1);
        assert_eq!(channel.push(&frame()), PushOutcome::ChannelClosed);
    }

    #[test]
    fn test_shutdown_interrupts_backoff() {
        let p = RetryPolicy {
            max_consecutive_restarts: 3,
            backoff_ms: 60_000,
            floor_fps: 5,
            degradation_step: 5,
        };
        let script = Rc::new(RefCell::new(Script {
            write_results: VecDeque::from([false]),
            ..Script::default()
        }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut channel =
            PushChannel::open(FakeSupervisor(script.clone()), 30, p, shutdown.clone()).unwrap();

        shutdown.store(true, Ordering::Relaxed);
        let started = Instant::now();
        assert_eq!(channel.push(&frame()), PushOutcome::ChannelClosed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(channel.state(), PushState::Terminated);
        assert_eq!(channel.total_restarts(), 0);
    }
}
