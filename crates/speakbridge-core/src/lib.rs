//! # Speakbridge Core
//!
//! Speech command pipeline connecting the speakup softsynth device to a
//! speech engine and an audio output.
//!
//! ## Features
//!
//! - Control-character aware tokenizer for the softsynth byte stream
//! - Reader and synth worker threads joined by a single shared queue
//! - Flush handling that cancels synthesis, drops queued work and discards
//!   stale audio without losing anything queued afterwards
//! - Generation-tagged audio callbacks so late buffers are never played
//!
//! ## Example
//!
//! ```rust,no_run
//! use speakbridge_core::{Pipeline, PipelineConfig, SpeechEngine};
//!
//! fn run(engine: Box<dyn SpeechEngine>) -> speakbridge_core::SpeakbridgeResult<()> {
//!     let config = PipelineConfig::default();
//!     let device = speakbridge_core::reader::open_device(&config.device_path)?;
//!     let handle = Pipeline::builder(config)
//!         .engine(engine)
//!         .device(device)
//!         .spawn()?;
//!
//!     // ... on SIGTERM:
//!     handle.shutdown();
//!     handle.join()
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod audio;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod reader;
pub mod state;
pub mod tokenizer;
pub mod worker;

// Re-export main types for convenience
pub use audio::{
    AudioConfig, AudioOutput, AudioSink, AudioWriteError, IndexReporter, SinkOutcome, WavFileOutput,
};
pub use command::{Adjust, Command};
pub use config::PipelineConfig;
pub use engine::{
    CallbackAction, EngineAdapter, EngineEvent, EngineParameter, OutputMode, SpeechEngine,
    SynthCallback, SynthFlags, VoiceSettings,
};
pub use error::{SpeakbridgeError, SpeakbridgeResult};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle};
pub use queue::CommandQueue;
pub use reader::{device_index_reporter, open_device, InputDevice, Reader};
pub use state::{Generation, PipelineState, StopOutcome};
pub use tokenizer::Tokenizer;
pub use worker::SynthWorker;

/// Version information for the speakbridge-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Control byte that starts a command sequence
pub const COMMAND_INTRODUCER: u8 = 0x01;

/// Control byte that cancels everything spoken or queued before it
pub const FLUSH_BYTE: u8 = 0x18;

/// Default size of one read from the softsynth device
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Default path of the speakup softsynth device
pub const DEFAULT_DEVICE_PATH: &str = "/dev/softsynth";
