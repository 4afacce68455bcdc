//! Shared fixtures for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use speakbridge_core::{
    AudioConfig, AudioOutput, AudioWriteError, CallbackAction, EngineEvent, EngineParameter,
    OutputMode, SpeakbridgeResult, SpeechEngine, SynthCallback, SynthFlags,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Samples the fake engine produces per byte of text
pub const SAMPLES_PER_BYTE: usize = 10;

#[derive(Default)]
struct EngineRecord {
    spoken: Vec<String>,
    parameters: Vec<(EngineParameter, i32)>,
    voices: Vec<String>,
    pending: Vec<(String, u64)>,
    callback: Option<SynthCallback>,
    initializations: usize,
    cancels: usize,
    terminations: usize,
}

/// Handle for inspecting a [`FakeEngine`] after it moved into a pipeline
#[derive(Clone, Default)]
pub struct EngineLog(Arc<Mutex<EngineRecord>>);

impl EngineLog {
    pub fn spoken(&self) -> Vec<String> {
        self.0.lock().spoken.clone()
    }

    pub fn parameters(&self) -> Vec<(EngineParameter, i32)> {
        self.0.lock().parameters.clone()
    }

    pub fn last_parameter(&self, parameter: EngineParameter) -> Option<i32> {
        self.0
            .lock()
            .parameters
            .iter()
            .rev()
            .find(|(p, _)| *p == parameter)
            .map(|(_, v)| *v)
    }

    pub fn voices(&self) -> Vec<String> {
        self.0.lock().voices.clone()
    }

    pub fn initializations(&self) -> usize {
        self.0.lock().initializations
    }

    pub fn cancels(&self) -> usize {
        self.0.lock().cancels
    }

    pub fn terminations(&self) -> usize {
        self.0.lock().terminations
    }

    pub fn pending(&self) -> usize {
        self.0.lock().pending.len()
    }

    /// Play back audio the engine held on to, as a late engine thread would
    pub fn deliver_pending(&self) -> Vec<CallbackAction> {
        let (pending, callback) = {
            let mut record = self.0.lock();
            (std::mem::take(&mut record.pending), record.callback.clone())
        };
        let Some(callback) = callback else {
            return Vec::new();
        };
        pending
            .into_iter()
            .map(|(text, tag)| deliver(&callback, &text, tag))
            .collect()
    }
}

fn deliver(callback: &SynthCallback, text: &str, tag: u64) -> CallbackAction {
    let samples = vec![1000i16; text.len() * SAMPLES_PER_BYTE];
    let mut events = Vec::new();
    if let Some(name) = text
        .strip_prefix("<mark name=\"")
        .and_then(|rest| rest.strip_suffix("\"/>"))
    {
        events.push(EngineEvent::Mark(name.to_string()));
    }
    events.push(EngineEvent::End);
    callback(&samples, &events, tag)
}

/// In-memory engine that renders text as a flat tone
pub struct FakeEngine {
    log: EngineLog,
    delay: Duration,
    deferred: bool,
}

impl FakeEngine {
    pub fn new() -> (Self, EngineLog) {
        let log = EngineLog::default();
        (
            Self {
                log: log.clone(),
                delay: Duration::ZERO,
                deferred: false,
            },
            log,
        )
    }

    /// Spend `delay` in every synth call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hold audio until [`EngineLog::deliver_pending`] is called
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

impl SpeechEngine for FakeEngine {
    fn initialize(&mut self, _mode: OutputMode, _buffer_length_ms: u32) -> SpeakbridgeResult<u32> {
        self.log.0.lock().initializations += 1;
        Ok(16_000)
    }

    fn set_callback(&mut self, callback: SynthCallback) {
        self.log.0.lock().callback = Some(callback);
    }

    fn set_parameter(&mut self, parameter: EngineParameter, value: i32) -> SpeakbridgeResult<()> {
        self.log.0.lock().parameters.push((parameter, value));
        Ok(())
    }

    fn set_voice_by_name(&mut self, name: &str) -> SpeakbridgeResult<()> {
        self.log.0.lock().voices.push(name.to_string());
        Ok(())
    }

    fn set_voice_by_language(&mut self, language: &str) -> SpeakbridgeResult<()> {
        self.log.0.lock().voices.push(language.to_string());
        Ok(())
    }

    fn synth(&mut self, text: &str, _flags: SynthFlags, tag: u64) -> SpeakbridgeResult<()> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let callback = {
            let mut record = self.log.0.lock();
            record.spoken.push(text.to_string());
            if self.deferred {
                record.pending.push((text.to_string(), tag));
                return Ok(());
            }
            record.callback.clone()
        };
        if let Some(callback) = callback {
            deliver(&callback, text, tag);
        }
        Ok(())
    }

    fn cancel(&mut self) -> SpeakbridgeResult<()> {
        self.log.0.lock().cancels += 1;
        Ok(())
    }

    fn terminate(&mut self) {
        let mut record = self.log.0.lock();
        record.terminations += 1;
        record.callback = None;
    }
}

/// Audio output that only counts what it is given
pub struct CountingOutput {
    written: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl CountingOutput {
    pub fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let written = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                written: Arc::clone(&written),
                drops: Arc::clone(&drops),
            },
            written,
            drops,
        )
    }
}

impl AudioOutput for CountingOutput {
    fn configure(&mut self, _config: &AudioConfig) -> Result<(), AudioWriteError> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize, AudioWriteError> {
        Ok(4096)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioWriteError> {
        self.written.fetch_add(samples.len(), Ordering::SeqCst);
        Ok(samples.len())
    }

    fn drop_stream(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }

    fn prepare(&mut self) -> Result<(), AudioWriteError> {
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
