//! State shared between the reader, the synth worker and the audio sink.
//!
//! One mutex guards the command queue together with the stop and shutdown
//! flags, so "stop requested" can never race "new command queued". Two
//! condition variables hang off that mutex: `runner_awake` wakes the worker,
//! `stop_acknowledged` wakes a reader waiting on a flush.

use crate::command::Command;
use crate::config::PipelineConfig;
use crate::error::{SpeakbridgeError, SpeakbridgeResult};
use crate::queue::CommandQueue;
use nix::fcntl::OFlag;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Monotonic tag identifying the current synthesis session.
///
/// Advanced exactly once per cancellation. Audio tagged with an older value
/// belongs to a cancelled session and must not reach the hardware.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Start at generation zero
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The live generation
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Retire the live generation and return the new one
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether `tag` belongs to a superseded session
    #[must_use]
    pub fn is_stale(&self, tag: u64) -> bool {
        tag < self.current()
    }
}

/// Result of a successful stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker cancelled synthesis and emptied the queue
    Acknowledged,
    /// The pipeline is shutting down; nothing further will be spoken
    ShuttingDown,
}

/// Everything protected by the pipeline mutex
#[derive(Debug)]
pub struct Shared {
    pub(crate) queue: CommandQueue<Command>,
    pub(crate) stop_requested: bool,
    /// Incremented by every stop request
    pub(crate) stop_epoch: u64,
    pub(crate) should_run: bool,
}

/// Self-pipe used to interrupt the reader's poll on shutdown
#[derive(Debug)]
struct WakePipe {
    read: File,
    write: File,
}

impl WakePipe {
    fn new() -> SpeakbridgeResult<Self> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self {
            read: File::from(read),
            write: File::from(write),
        })
    }

    fn signal(&self) {
        match (&self.write).write(b"s") {
            Ok(_) => {}
            // A full pipe already guarantees the reader will wake.
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("Failed to signal wake pipe: {}", e),
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 16];
        loop {
            match (&self.read).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
    }
}

/// Explicit replacement for process-wide flags: the queue, the stop and
/// shutdown flags, their condition variables and the reader's wake pipe
#[derive(Debug)]
pub struct PipelineState {
    shared: Mutex<Shared>,
    runner_awake: Condvar,
    stop_acknowledged: Condvar,
    wake: WakePipe,
    generation: Arc<Generation>,
    queue_warn_threshold: usize,
}

impl PipelineState {
    /// Create a running pipeline state with an empty queue
    ///
    /// # Errors
    ///
    /// Returns an error if the wake pipe cannot be created
    pub fn new() -> SpeakbridgeResult<Self> {
        Self::from_config(&PipelineConfig::default())
    }

    /// Create a pipeline state using the limits in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the wake pipe cannot be created
    pub fn from_config(config: &PipelineConfig) -> SpeakbridgeResult<Self> {
        Ok(Self {
            shared: Mutex::new(Shared {
                queue: CommandQueue::new(),
                stop_requested: false,
                stop_epoch: 0,
                should_run: true,
            }),
            runner_awake: Condvar::new(),
            stop_acknowledged: Condvar::new(),
            wake: WakePipe::new()?,
            generation: Arc::new(Generation::new()),
            queue_warn_threshold: config.queue_warn_threshold,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock()
    }

    /// Session counter shared with the worker and the audio sink
    #[must_use]
    pub const fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    pub(crate) fn runner_awake(&self) -> &Condvar {
        &self.runner_awake
    }

    /// Queue one command for the synth worker.
    ///
    /// Returns `false` if the command was not queued because it carries no
    /// work or the pipeline is shutting down.
    pub fn enqueue(&self, command: Command) -> bool {
        self.enqueue_all(std::iter::once(command)) == 1
    }

    /// Queue a batch of commands under a single lock acquisition, waking the
    /// worker once. Flush and unknown commands are skipped.
    ///
    /// Returns the number of commands queued.
    pub fn enqueue_all<I>(&self, commands: I) -> usize
    where
        I: IntoIterator<Item = Command>,
    {
        let mut shared = self.shared.lock();
        if !shared.should_run {
            return 0;
        }

        let before = shared.queue.len();
        shared
            .queue
            .extend(commands.into_iter().filter(Command::is_queueable));
        let len = shared.queue.len();
        let added = len - before;

        if added > 0 {
            self.runner_awake.notify_one();
        }
        if before < self.queue_warn_threshold && len >= self.queue_warn_threshold {
            warn!(queue_len = len, "Synth queue is growing faster than it drains");
        }
        added
    }

    /// Ask the worker to cancel synthesis and empty the queue, then wait for
    /// its acknowledgment.
    ///
    /// If the worker does not answer within `timeout` the request is
    /// withdrawn, the queue is emptied here instead, the generation is
    /// advanced so audio from the interrupted session stays discarded, and
    /// [`SpeakbridgeError::StopTimeout`] is returned. Commands queued after
    /// this call returns are never affected by the stale request.
    ///
    /// # Errors
    ///
    /// Returns [`SpeakbridgeError::StopTimeout`] if the worker never acknowledged
    pub fn request_stop(&self, timeout: Duration) -> SpeakbridgeResult<StopOutcome> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared.lock();
        if !shared.should_run {
            return Ok(StopOutcome::ShuttingDown);
        }

        shared.stop_epoch += 1;
        let epoch = shared.stop_epoch;
        shared.stop_requested = true;
        self.runner_awake.notify_one();
        debug!(epoch, queue_len = shared.queue.len(), "Stop requested");

        while Self::stop_pending(&shared, epoch) {
            if self
                .stop_acknowledged
                .wait_until(&mut shared, deadline)
                .timed_out()
                && Self::stop_pending(&shared, epoch)
            {
                shared.stop_requested = false;
                let dropped = shared.queue.clear();
                let generation = self.generation.advance();
                error!(
                    dropped,
                    generation,
                    timeout_ms = timeout.as_millis(),
                    "Synth worker did not acknowledge stop; continuing degraded"
                );
                return Err(SpeakbridgeError::stop_timeout(format!(
                    "no acknowledgment within {timeout:?}"
                )));
            }
        }

        if shared.should_run {
            Ok(StopOutcome::Acknowledged)
        } else {
            Ok(StopOutcome::ShuttingDown)
        }
    }

    fn stop_pending(shared: &Shared, epoch: u64) -> bool {
        shared.stop_requested && shared.stop_epoch == epoch && shared.should_run
    }

    /// Called by the worker, with the lock held, once cancellation is
    /// complete. Empties the queue and returns how many commands were
    /// dropped, or `None` without touching anything if the request
    /// identified by `epoch` was withdrawn in the meantime.
    pub(crate) fn acknowledge_stop(&self, shared: &mut Shared, epoch: u64) -> Option<usize> {
        if !shared.stop_requested || shared.stop_epoch != epoch {
            return None;
        }
        let dropped = shared.queue.clear();
        shared.stop_requested = false;
        self.stop_acknowledged.notify_all();
        Some(dropped)
    }

    /// Wake every waiter so it can observe shutdown
    pub(crate) fn release_waiters(&self) {
        self.runner_awake.notify_all();
        self.stop_acknowledged.notify_all();
    }

    /// Tell both loops to finish and interrupt the reader's poll.
    pub fn request_shutdown(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.should_run {
                info!("Shutdown requested");
            }
            shared.should_run = false;
            self.release_waiters();
        }
        self.wake.signal();
    }

    /// Whether shutdown has not yet been requested
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock().should_run
    }

    /// Whether a stop request is waiting for the worker
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.lock().stop_requested
    }

    /// Number of commands waiting for the worker
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Read end of the wake pipe, for inclusion in a readiness wait
    #[must_use]
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.wake.read.as_fd()
    }

    pub(crate) fn drain_wake(&self) {
        self.wake.drain();
    }
}
