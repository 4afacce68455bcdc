//! The synth worker: drains the command queue into the engine.

use crate::audio::AudioSink;
use crate::command::Command;
use crate::config::PipelineConfig;
use crate::engine::EngineAdapter;
use crate::state::{PipelineState, Shared};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consumes queued commands and answers stop requests.
///
/// The shared lock is held only while inspecting the queue and flags; every
/// engine and sink call happens with it released.
#[derive(Debug)]
pub struct SynthWorker {
    state: Arc<PipelineState>,
    adapter: EngineAdapter,
    sink: Arc<AudioSink>,
    in_flight: Option<Command>,
    busy_retry_interval: Duration,
}

impl SynthWorker {
    /// Create a worker around an engine adapter and the sink its callback feeds
    #[must_use]
    pub fn new(
        state: Arc<PipelineState>,
        adapter: EngineAdapter,
        sink: Arc<AudioSink>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            state,
            adapter,
            sink,
            in_flight: None,
            busy_retry_interval: config.busy_retry_interval(),
        }
    }

    /// Run until shutdown is requested, then release the engine.
    pub fn run(mut self) {
        let state = Arc::clone(&self.state);
        let mut shared = state.lock();
        info!("Synth worker started");

        while shared.should_run {
            if shared.stop_requested {
                self.cancel(&state, &mut shared);
                continue;
            }

            if self.in_flight.is_none() {
                self.in_flight = shared.queue.pop();
            }
            let Some(command) = self.in_flight.take() else {
                state.runner_awake().wait(&mut shared);
                continue;
            };

            let result = MutexGuard::unlocked(&mut shared, || self.adapter.apply(&command));
            match result {
                Ok(()) => debug!(command = command.name(), "Command applied"),
                Err(e) if e.is_retriable() => {
                    debug!(command = command.name(), "Engine busy, will retry: {}", e);
                    self.in_flight = Some(command);
                    if !shared.stop_requested && shared.should_run {
                        state
                            .runner_awake()
                            .wait_for(&mut shared, self.busy_retry_interval);
                    }
                }
                Err(e) => warn!(command = command.name(), "Dropping command: {}", e),
            }
        }

        self.in_flight = None;
        state.release_waiters();
        drop(shared);
        self.adapter.shutdown();
        info!("Synth worker stopped");
    }

    /// Cancel all synthesis and empty the queue, then acknowledge the stop.
    ///
    /// The queue is only emptied if the same stop request is still pending
    /// once the engine has been cancelled. A request the reader withdrew on
    /// timeout has already been handled there, and anything queued since
    /// belongs to the next session.
    fn cancel(&mut self, state: &PipelineState, shared: &mut MutexGuard<'_, Shared>) {
        let epoch = shared.stop_epoch;
        let generation = state.generation().advance();
        MutexGuard::unlocked(shared, || {
            self.adapter.cancel();
            self.sink.abort();
        });
        let abandoned = self.in_flight.take().is_some();
        match state.acknowledge_stop(shared, epoch) {
            Some(dropped) => info!(generation, dropped, abandoned, "Synthesis cancelled"),
            None => warn!(
                generation,
                queue_len = shared.queue.len(),
                "Stop was withdrawn before cancellation finished; keeping queue"
            ),
        }
    }

    /// The effective voice parameters
    #[must_use]
    pub const fn settings(&self) -> &crate::engine::VoiceSettings {
        self.adapter.settings()
    }
}
