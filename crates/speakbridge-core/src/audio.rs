//! Audio sink fed by the engine callback.
//!
//! [`AudioSink::handle_buffer`] runs on the engine's own thread. It checks
//! the shared stop flag and the buffer's generation tag before every write,
//! so audio belonging to a cancelled session never reaches the hardware.

use crate::config::PipelineConfig;
use crate::engine::{CallbackAction, EngineEvent, SynthCallback};
use crate::error::{SpeakbridgeError, SpeakbridgeResult};
use crate::state::{Generation, PipelineState};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Hardware stream parameters. Samples are signed 16-bit, interleaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// Output device name
    pub device: String,
    /// Sample rate reported by the engine
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Frames written per chunk at most
    pub period_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 22_050,
            channels: 1,
            period_frames: 1024,
        }
    }
}

impl AudioConfig {
    /// Mono configuration for `device` at `sample_rate`
    #[must_use]
    pub fn new<S: Into<String>>(device: S, sample_rate: u32) -> Self {
        Self {
            device: device.into(),
            sample_rate,
            ..Self::default()
        }
    }
}

/// Failure reported by an [`AudioOutput`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioWriteError {
    /// The hardware ran dry and must be re-prepared
    #[error("audio buffer underrun")]
    Underrun,
    /// The stream cannot continue
    #[error("audio device failure: {0}")]
    Fatal(String),
}

impl From<AudioWriteError> for SpeakbridgeError {
    fn from(err: AudioWriteError) -> Self {
        match err {
            AudioWriteError::Underrun => Self::underrun("audio buffer underrun"),
            AudioWriteError::Fatal(message) => Self::hardware(message),
        }
    }
}

/// Opaque PCM output stream
#[cfg_attr(test, mockall::automock)]
pub trait AudioOutput: Send {
    /// Open or reconfigure the stream
    fn configure(&mut self, config: &AudioConfig) -> Result<(), AudioWriteError>;

    /// Frames the stream can accept without blocking
    fn available(&mut self) -> Result<usize, AudioWriteError>;

    /// Write samples, returning how many were taken
    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioWriteError>;

    /// Discard everything queued in the stream
    fn drop_stream(&mut self);

    /// Make the stream ready to accept samples again
    fn prepare(&mut self) -> Result<(), AudioWriteError>;
}

/// Receives speech index marks as playback reaches them
pub type IndexReporter = Arc<dyn Fn(u8) + Send + Sync>;

/// What happened to one callback buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOutcome {
    /// Answer for the engine
    pub action: CallbackAction,
    /// Samples that reached the output
    pub written: usize,
}

impl SinkOutcome {
    const fn abort(written: usize) -> Self {
        Self {
            action: CallbackAction::Abort,
            written,
        }
    }
}

struct SinkOutput {
    device: Option<Box<dyn AudioOutput>>,
    retired: Option<u64>,
    last_tag: Option<u64>,
}

impl SinkOutput {
    fn abandon(&mut self, tag: Option<u64>) {
        if let Some(device) = self.device.as_mut() {
            device.drop_stream();
        }
        if tag.is_some() {
            self.retired = tag;
        }
        self.last_tag = None;
    }
}

/// Writes engine audio to an [`AudioOutput`], honouring stop requests
pub struct AudioSink {
    state: Arc<PipelineState>,
    generation: Arc<Generation>,
    output: Mutex<SinkOutput>,
    index_reporter: Option<IndexReporter>,
    max_write_retries: u32,
    retry_backoff: Duration,
}

impl std::fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSink")
            .field("generation", &self.generation.current())
            .field("max_write_retries", &self.max_write_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

impl AudioSink {
    /// Create a sink without an output; buffers are checked and marks
    /// reported, but samples go nowhere.
    #[must_use]
    pub fn new(
        state: Arc<PipelineState>,
        generation: Arc<Generation>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            state,
            generation,
            output: Mutex::new(SinkOutput {
                device: None,
                retired: None,
                last_tag: None,
            }),
            index_reporter: None,
            max_write_retries: config.max_write_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    /// Attach the hardware output
    #[must_use]
    pub fn with_output(mut self, output: Box<dyn AudioOutput>) -> Self {
        self.output.get_mut().device = Some(output);
        self
    }

    /// Attach a receiver for index marks
    #[must_use]
    pub fn with_index_reporter(mut self, reporter: IndexReporter) -> Self {
        self.index_reporter = Some(reporter);
        self
    }

    /// Configure the attached output for the engine's sample rate
    ///
    /// # Errors
    ///
    /// Returns an error if the output refuses the configuration
    pub fn configure(&self, config: &AudioConfig) -> SpeakbridgeResult<()> {
        let mut output = self.output.lock();
        if let Some(device) = output.device.as_mut() {
            device.configure(config)?;
            info!(
                device = %config.device,
                sample_rate = config.sample_rate,
                channels = config.channels,
                "Audio output configured"
            );
        }
        Ok(())
    }

    /// Wrap this sink as an engine callback
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> SynthCallback {
        let sink = Arc::clone(self);
        Arc::new(move |samples: &[i16], events: &[EngineEvent], tag: u64| {
            sink.handle_buffer(samples, events, tag).action
        })
    }

    /// Drop whatever the stream holds and refuse the session that was playing
    pub fn abort(&self) {
        let mut output = self.output.lock();
        let tag = output.last_tag;
        output.abandon(tag);
        debug!(retired = ?output.retired, "Audio stream aborted");
    }

    /// Whether playback must stop, checked under the shared lock
    fn must_stop(&self, tag: u64) -> bool {
        let shared = self.state.lock();
        shared.stop_requested || !shared.should_run || self.generation.is_stale(tag)
    }

    fn stop_and_wake(&self, output: &mut SinkOutput, tag: u64, written: usize) -> SinkOutcome {
        output.abandon(Some(tag));
        self.state.runner_awake().notify_one();
        debug!(tag, written, "Audio buffer abandoned on stop");
        SinkOutcome::abort(written)
    }

    /// Play one buffer delivered by the engine.
    pub fn handle_buffer(&self, samples: &[i16], events: &[EngineEvent], tag: u64) -> SinkOutcome {
        let mut output = self.output.lock();

        {
            let shared = self.state.lock();
            if shared.stop_requested || !shared.should_run {
                drop(shared);
                return self.stop_and_wake(&mut output, tag, 0);
            }
        }

        if self.generation.is_stale(tag) || output.retired == Some(tag) {
            return SinkOutcome::abort(0);
        }

        let written = if samples.is_empty() || output.device.is_none() {
            0
        } else {
            if output.last_tag != Some(tag) {
                output.last_tag = Some(tag);
                if let Some(Err(e)) = output.device.as_mut().map(|d| d.prepare()) {
                    warn!("Unable to prepare audio stream: {}", e);
                }
            }
            match self.write_all(&mut output, samples, tag) {
                Ok(written) => written,
                Err(written) => return self.stop_and_wake(&mut output, tag, written),
            }
        };

        drop(output);
        self.report_marks(events);

        SinkOutcome {
            action: CallbackAction::Continue,
            written,
        }
    }

    /// Write loop. `Err` carries the samples written before a stop was seen.
    fn write_all(&self, output: &mut SinkOutput, samples: &[i16], tag: u64) -> Result<usize, usize> {
        let Some(device) = output.device.as_mut() else {
            return Ok(0);
        };

        let mut offset = 0;
        let mut retries = 0;
        while offset < samples.len() {
            if self.must_stop(tag) {
                return Err(offset);
            }

            let attempt = device.available().and_then(|room| {
                if room == 0 {
                    Ok(0)
                } else {
                    let end = samples.len().min(offset + room);
                    device.write(&samples[offset..end])
                }
            });

            match attempt {
                Ok(0) => {
                    retries += 1;
                    if retries > self.max_write_retries {
                        warn!(
                            remaining = samples.len() - offset,
                            "Audio output made no progress; dropping rest of buffer"
                        );
                        break;
                    }
                    thread::sleep(self.retry_backoff);
                }
                Ok(n) => {
                    offset += n;
                    retries = 0;
                }
                Err(AudioWriteError::Underrun) => {
                    retries += 1;
                    if retries > self.max_write_retries {
                        warn!("Repeated audio underruns; dropping rest of buffer");
                        break;
                    }
                    debug!("Audio underrun, re-preparing stream");
                    if let Err(e) = device.prepare() {
                        error!("Unable to recover audio stream: {}", e);
                        break;
                    }
                }
                Err(AudioWriteError::Fatal(message)) => {
                    error!("Audio write failed: {}", message);
                    break;
                }
            }
        }
        Ok(offset)
    }

    fn report_marks(&self, events: &[EngineEvent]) {
        let Some(reporter) = self.index_reporter.as_ref() else {
            return;
        };
        for event in events {
            if let EngineEvent::Mark(name) = event {
                match name.parse::<u8>() {
                    Ok(index) => reporter(index),
                    Err(_) => debug!(mark = %name, "Ignoring non-numeric mark"),
                }
            }
        }
    }
}

/// [`AudioOutput`] that records to a 16-bit WAV file
pub struct WavFileOutput {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    period_frames: usize,
    samples_written: usize,
}

impl std::fmt::Debug for WavFileOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileOutput")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

impl WavFileOutput {
    /// Record to `path`; the file is created by [`AudioOutput::configure`]
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            period_frames: AudioConfig::default().period_frames,
            samples_written: 0,
        }
    }

    /// Samples recorded so far
    #[must_use]
    pub const fn samples_written(&self) -> usize {
        self.samples_written
    }

    /// Write the WAV header and close the file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be finalized
    pub fn finalize(mut self) -> SpeakbridgeResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut WavWriter<BufWriter<File>>, AudioWriteError> {
        self.writer
            .as_mut()
            .ok_or_else(|| AudioWriteError::Fatal("WAV output is not configured".to_string()))
    }
}

impl AudioOutput for WavFileOutput {
    fn configure(&mut self, config: &AudioConfig) -> Result<(), AudioWriteError> {
        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.path, spec)
            .map_err(|e| AudioWriteError::Fatal(e.to_string()))?;
        self.writer = Some(writer);
        self.period_frames = config.period_frames.max(1) * usize::from(config.channels.max(1));
        debug!(path = %self.path.display(), "WAV capture opened");
        Ok(())
    }

    fn available(&mut self) -> Result<usize, AudioWriteError> {
        self.writer()?;
        Ok(self.period_frames)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioWriteError> {
        let writer = self.writer()?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| AudioWriteError::Fatal(e.to_string()))?;
        }
        self.samples_written += samples.len();
        Ok(samples.len())
    }

    fn drop_stream(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Unable to flush WAV capture: {}", e);
            }
        }
    }

    fn prepare(&mut self) -> Result<(), AudioWriteError> {
        self.writer().map(|_| ())
    }
}
