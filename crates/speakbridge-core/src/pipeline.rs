//! Wiring: builds the shared state, engine adapter, audio sink, synth worker
//! and reader, and runs the two loops on their own threads.

use crate::audio::{AudioConfig, AudioOutput, AudioSink, IndexReporter};
use crate::config::PipelineConfig;
use crate::engine::{EngineAdapter, OutputMode, SpeechEngine};
use crate::error::{SpeakbridgeError, SpeakbridgeResult};
use crate::reader::{device_index_reporter, open_device, InputDevice, Reader};
use crate::state::{Generation, PipelineState};
use std::io::Write;
use crate::worker::SynthWorker;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Entry point for assembling a pipeline
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    /// Start building a pipeline from `config`
    #[must_use]
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            engine: None,
            device: None,
            audio_output: None,
            index_reporter: None,
        }
    }
}

/// Collects the collaborators a pipeline needs
pub struct PipelineBuilder {
    config: PipelineConfig,
    engine: Option<Box<dyn SpeechEngine>>,
    device: Option<Box<dyn InputDevice>>,
    audio_output: Option<Box<dyn AudioOutput>>,
    index_reporter: Option<IndexReporter>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("engine", &self.engine.is_some())
            .field("device", &self.device.is_some())
            .field("audio_output", &self.audio_output.is_some())
            .field("index_reporter", &self.index_reporter.is_some())
            .finish()
    }
}

impl PipelineBuilder {
    /// Speech engine to drive (required)
    #[must_use]
    pub fn engine(mut self, engine: Box<dyn SpeechEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Input device; when omitted, `device_path` is opened at spawn time
    #[must_use]
    pub fn device<D: InputDevice + 'static>(mut self, device: D) -> Self {
        self.device = Some(Box::new(device));
        self
    }

    /// Output for audio retrieved from the engine
    #[must_use]
    pub fn audio_output(mut self, output: Box<dyn AudioOutput>) -> Self {
        self.audio_output = Some(output);
        self
    }

    /// Receiver for index marks reached during playback
    #[must_use]
    pub fn index_reporter(mut self, reporter: IndexReporter) -> Self {
        self.index_reporter = Some(reporter);
        self
    }

    /// Write reached index marks back to `writer`, normally a second handle
    /// on the device passed to [`PipelineBuilder::device`]. When the device
    /// is opened from `device_path` this happens without being asked.
    #[must_use]
    pub fn index_reports_to<W: Write + Send + 'static>(self, writer: W) -> Self {
        self.index_reporter(device_index_reporter(writer))
    }

    /// Start the engine and spawn the synth worker and reader threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no engine was
    /// supplied, the device cannot be opened, the engine or audio output
    /// fails to start, or a thread cannot be spawned
    pub fn spawn(self) -> SpeakbridgeResult<PipelineHandle> {
        let Self {
            config,
            engine,
            device,
            audio_output,
            mut index_reporter,
        } = self;
        config.validate()?;

        let engine =
            engine.ok_or_else(|| SpeakbridgeError::configuration("no speech engine supplied"))?;
        let device: Box<dyn InputDevice> = match device {
            Some(device) => device,
            None => open_configured_device(&config, &mut index_reporter)?,
        };

        let state = Arc::new(PipelineState::from_config(&config)?);
        let generation = Arc::clone(state.generation());

        let mut sink = AudioSink::new(Arc::clone(&state), Arc::clone(&generation), &config);
        match audio_output {
            Some(output) => sink = sink.with_output(output),
            None if config.output_mode == OutputMode::Retrieval => {
                warn!("No audio output attached; retrieved audio will be discarded");
            }
            None => {}
        }
        if let Some(reporter) = index_reporter {
            sink = sink.with_index_reporter(reporter);
        }
        let sink = Arc::new(sink);

        let mut adapter = EngineAdapter::new(engine, &config, Arc::clone(&generation));
        adapter.set_callback(sink.callback());
        let sample_rate = adapter.initialize()?;
        if config.output_mode == OutputMode::Retrieval {
            let audio = AudioConfig::new(config.audio_device.clone(), sample_rate);
            if let Err(e) = sink.configure(&audio) {
                adapter.shutdown();
                return Err(e);
            }
        }

        let worker = SynthWorker::new(Arc::clone(&state), adapter, sink, &config);
        let worker_thread = thread::Builder::new()
            .name("speakbridge-synth".to_string())
            .spawn(move || worker.run())?;

        let mut reader = Reader::new(device, Arc::clone(&state), &config);
        let reader_thread = match thread::Builder::new()
            .name("speakbridge-reader".to_string())
            .spawn(move || reader.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                state.request_shutdown();
                if worker_thread.join().is_err() {
                    warn!("Synth worker panicked during start-up");
                }
                return Err(e.into());
            }
        };

        info!(
            mode = ?config.output_mode,
            sample_rate,
            device = %config.device_path.display(),
            "Pipeline started"
        );

        Ok(PipelineHandle {
            state,
            generation,
            worker: Some(worker_thread),
            reader: Some(reader_thread),
        })
    }
}

/// Open `device_path`, sending index reports back through it unless another
/// reporter was supplied.
fn open_configured_device(
    config: &PipelineConfig,
    index_reporter: &mut Option<IndexReporter>,
) -> SpeakbridgeResult<Box<dyn InputDevice>> {
    let file = open_device(&config.device_path)?;
    if index_reporter.is_none() {
        *index_reporter = Some(device_index_reporter(file.try_clone()?));
    }
    Ok(Box::new(file))
}

/// Running pipeline. Dropping the handle shuts the pipeline down.
#[derive(Debug)]
pub struct PipelineHandle {
    state: Arc<PipelineState>,
    generation: Arc<Generation>,
    worker: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<SpeakbridgeResult<()>>>,
}

impl PipelineHandle {
    /// Ask both threads to finish
    pub fn shutdown(&self) {
        self.state.request_shutdown();
    }

    /// Shared pipeline state
    #[must_use]
    pub const fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    /// Current synthesis generation
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Wait for the reader to finish (device closed or shutdown requested),
    /// then for the synth worker.
    ///
    /// # Errors
    ///
    /// Returns the reader's error, or an error if either thread panicked
    pub fn join(mut self) -> SpeakbridgeResult<()> {
        self.join_threads()
    }

    fn join_threads(&mut self) -> SpeakbridgeResult<()> {
        let reader_result = match self.reader.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(SpeakbridgeError::io("reader thread panicked"))),
            None => Ok(()),
        };
        // The reader only returns once shutdown is underway; make sure of it.
        self.state.request_shutdown();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                return Err(SpeakbridgeError::io("synth worker thread panicked"));
            }
        }
        info!("Pipeline stopped");
        reader_result
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.reader.is_some() || self.worker.is_some() {
            self.state.request_shutdown();
            if let Err(e) = self.join_threads() {
                warn!("Pipeline did not stop cleanly: {}", e);
            }
        }
    }
}
