//! Pipeline configuration.

use crate::engine::{OutputMode, VoiceSettings};
use crate::error::{SpeakbridgeError, SpeakbridgeResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the reader, the synth worker and the audio sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the softsynth device
    pub device_path: PathBuf,
    /// Bytes requested from the device per read
    pub read_buffer_size: usize,
    /// Audio buffer length handed to the engine, in milliseconds
    pub engine_buffer_ms: u32,
    /// Whether the engine plays audio itself or hands it back through the callback
    pub output_mode: OutputMode,
    /// Name of the audio output device
    pub audio_device: String,
    /// Voice parameters applied at start-up and after a pause
    pub defaults: VoiceSettings,
    /// How long the reader waits for the worker to acknowledge a stop
    pub stop_ack_timeout_ms: u64,
    /// Delay before retrying a command the engine was too busy to take
    pub busy_retry_interval_ms: u64,
    /// Attempts the audio sink makes when the hardware has no room or underruns
    pub max_write_retries: u32,
    /// Pause between audio write retries, in milliseconds
    pub retry_backoff_ms: u64,
    /// Spell out single-character text runs instead of reading them as words
    pub spell_single_characters: bool,
    /// Queue length above which a warning is logged
    pub queue_warn_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(crate::DEFAULT_DEVICE_PATH),
            read_buffer_size: crate::DEFAULT_READ_BUFFER_SIZE,
            engine_buffer_ms: 0,
            output_mode: OutputMode::Retrieval,
            audio_device: "default".to_string(),
            defaults: VoiceSettings::default(),
            stop_ack_timeout_ms: 5_000,
            busy_retry_interval_ms: 20,
            max_write_retries: 200,
            retry_backoff_ms: 5,
            spell_single_characters: true,
            queue_warn_threshold: 4096,
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or the values fail validation
    pub fn from_toml_str(document: &str) -> SpeakbridgeResult<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the device path
    #[must_use]
    pub fn with_device_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.device_path = path.into();
        self
    }

    /// Set the output mode
    #[must_use]
    pub const fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Set the start-up voice parameters
    #[must_use]
    pub fn with_defaults(mut self, defaults: VoiceSettings) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the stop acknowledgment timeout
    #[must_use]
    pub fn with_stop_ack_timeout(mut self, timeout: Duration) -> Self {
        self.stop_ack_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the busy retry interval
    #[must_use]
    pub fn with_busy_retry_interval(mut self, interval: Duration) -> Self {
        self.busy_retry_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable spelling of single characters
    #[must_use]
    pub const fn with_spelling(mut self, enabled: bool) -> Self {
        self.spell_single_characters = enabled;
        self
    }

    /// Stop acknowledgment timeout as a [`Duration`]
    #[must_use]
    pub const fn stop_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_ack_timeout_ms)
    }

    /// Busy retry interval as a [`Duration`]
    #[must_use]
    pub const fn busy_retry_interval(&self) -> Duration {
        Duration::from_millis(self.busy_retry_interval_ms)
    }

    /// Audio retry backoff as a [`Duration`]
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value
    pub fn validate(&self) -> SpeakbridgeResult<()> {
        if self.read_buffer_size == 0 {
            return Err(SpeakbridgeError::configuration(
                "read_buffer_size must be greater than 0",
            ));
        }

        if self.stop_ack_timeout_ms == 0 {
            return Err(SpeakbridgeError::configuration(
                "stop_ack_timeout_ms must be greater than 0",
            ));
        }

        if self.busy_retry_interval_ms == 0 {
            return Err(SpeakbridgeError::configuration(
                "busy_retry_interval_ms must be greater than 0",
            ));
        }

        if self.output_mode == OutputMode::Retrieval && self.audio_device.is_empty() {
            return Err(SpeakbridgeError::configuration(
                "audio_device must be set when audio is retrieved from the engine",
            ));
        }

        Ok(())
    }
}
