//! Speech engine interface and the adapter that drives it.
//!
//! The engine itself (text to phonemes to samples) is an external
//! collaborator behind [`SpeechEngine`]. [`EngineAdapter`] owns the engine
//! on the synth worker's thread, applies [`Command`]s to it and mirrors the
//! effective voice parameters in [`VoiceSettings`].

use crate::command::{Adjust, Command};
use crate::config::PipelineConfig;
use crate::error::SpeakbridgeResult;
use crate::state::Generation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Engine scale factor for the frequency (intonation range) setting
pub const FREQUENCY_MULTIPLIER: i32 = 11;
/// Engine scale factor for pitch
pub const PITCH_MULTIPLIER: i32 = 11;
/// Engine scale factor for rate
pub const RATE_MULTIPLIER: i32 = 41;
/// Words-per-minute offset added to the scaled rate
pub const RATE_OFFSET: i32 = 80;
/// Engine scale factor for volume
pub const VOLUME_MULTIPLIER: i32 = 22;

/// Where synthesized audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// The engine plays audio on its own
    Playback,
    /// The engine hands samples back through the synth callback
    Retrieval,
}

/// Engine-level parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineParameter {
    /// Speaking rate in words per minute
    Rate,
    /// Output volume
    Volume,
    /// Base pitch
    Pitch,
    /// Pitch range (intonation)
    Range,
    /// Punctuation verbosity
    Punctuation,
    /// Capital letter indication
    Capitals,
}

/// Options for one synthesis request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthFlags {
    /// Interpret the text as SSML
    pub ssml: bool,
}

/// Events the engine reports alongside audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback reached a `<mark name="..."/>`
    Mark(String),
    /// Start of a word at the given character offset
    Word(usize),
    /// Start of a sentence at the given character offset
    Sentence(usize),
    /// The synthesis request is complete
    End,
}

/// What the engine should do after a callback returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep delivering audio
    Continue,
    /// Stop synthesizing the current request
    Abort,
}

/// Callback the engine invokes from its own thread with
/// `(samples, events, session tag)`
pub type SynthCallback = Arc<dyn Fn(&[i16], &[EngineEvent], u64) -> CallbackAction + Send + Sync>;

/// External speech synthesis engine.
///
/// Implementations return [`SpeakbridgeError::EngineBusy`] when a request
/// should be retried later and
/// [`SpeakbridgeError::ParameterRejected`] when a value is refused.
///
/// [`SpeakbridgeError::EngineBusy`]: crate::SpeakbridgeError::EngineBusy
/// [`SpeakbridgeError::ParameterRejected`]: crate::SpeakbridgeError::ParameterRejected
#[cfg_attr(test, mockall::automock)]
pub trait SpeechEngine: Send {
    /// Start the engine and return its output sample rate
    fn initialize(&mut self, mode: OutputMode, buffer_length_ms: u32) -> SpeakbridgeResult<u32>;

    /// Register the callback that receives audio and events
    fn set_callback(&mut self, callback: SynthCallback);

    /// Set one engine parameter, already converted to engine scale
    fn set_parameter(&mut self, parameter: EngineParameter, value: i32) -> SpeakbridgeResult<()>;

    /// Select a voice by name
    fn set_voice_by_name(&mut self, name: &str) -> SpeakbridgeResult<()>;

    /// Select a voice by language
    fn set_voice_by_language(&mut self, language: &str) -> SpeakbridgeResult<()>;

    /// Queue `text` for synthesis; audio is delivered asynchronously through
    /// the callback, tagged with `tag`
    fn synth(&mut self, text: &str, flags: SynthFlags, tag: u64) -> SpeakbridgeResult<()>;

    /// Abandon all pending synthesis
    fn cancel(&mut self) -> SpeakbridgeResult<()>;

    /// Release all engine resources
    fn terminate(&mut self);
}

/// Effective voice parameters, in speakup's 0-9 scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Intonation range
    pub frequency: i32,
    /// Base pitch
    pub pitch: i32,
    /// Speaking rate
    pub rate: i32,
    /// Volume
    pub volume: i32,
    /// Punctuation level
    pub punctuation: i32,
    /// Voice name or language; empty keeps the engine default
    pub voice: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            frequency: 5,
            pitch: 5,
            rate: 2,
            volume: 5,
            punctuation: 0,
            voice: String::new(),
        }
    }
}

impl VoiceSettings {
    /// Apply a parameter command without touching any engine
    pub fn fold(&mut self, command: &Command) {
        if let Some((field, adjust, value)) = VoiceField::of(command) {
            let next = adjust.apply(field.get(self), value);
            field.set(self, next);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum VoiceField {
    Frequency,
    Pitch,
    Rate,
    Volume,
    Punctuation,
}

impl VoiceField {
    const ALL: [Self; 5] = [
        Self::Frequency,
        Self::Pitch,
        Self::Rate,
        Self::Volume,
        Self::Punctuation,
    ];

    fn of(command: &Command) -> Option<(Self, Adjust, i32)> {
        match *command {
            Command::SetFrequency(adjust, value) => Some((Self::Frequency, adjust, value)),
            Command::SetPitch(adjust, value) => Some((Self::Pitch, adjust, value)),
            Command::SetRate(adjust, value) => Some((Self::Rate, adjust, value)),
            Command::SetVolume(adjust, value) => Some((Self::Volume, adjust, value)),
            Command::SetPunctuation(adjust, value) => Some((Self::Punctuation, adjust, value)),
            _ => None,
        }
    }

    const fn get(self, settings: &VoiceSettings) -> i32 {
        match self {
            Self::Frequency => settings.frequency,
            Self::Pitch => settings.pitch,
            Self::Rate => settings.rate,
            Self::Volume => settings.volume,
            Self::Punctuation => settings.punctuation,
        }
    }

    fn set(self, settings: &mut VoiceSettings, value: i32) {
        match self {
            Self::Frequency => settings.frequency = value,
            Self::Pitch => settings.pitch = value,
            Self::Rate => settings.rate = value,
            Self::Volume => settings.volume = value,
            Self::Punctuation => settings.punctuation = value,
        }
    }

    const fn parameter(self) -> EngineParameter {
        match self {
            Self::Frequency => EngineParameter::Range,
            Self::Pitch => EngineParameter::Pitch,
            Self::Rate => EngineParameter::Rate,
            Self::Volume => EngineParameter::Volume,
            Self::Punctuation => EngineParameter::Punctuation,
        }
    }

    const fn scale(self, value: i32) -> i32 {
        match self {
            Self::Frequency => value.saturating_mul(FREQUENCY_MULTIPLIER),
            Self::Pitch => value.saturating_mul(PITCH_MULTIPLIER),
            Self::Rate => value.saturating_mul(RATE_MULTIPLIER).saturating_add(RATE_OFFSET),
            Self::Volume => value.saturating_add(1).saturating_mul(VOLUME_MULTIPLIER),
            Self::Punctuation => value,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Pitch => "pitch",
            Self::Rate => "rate",
            Self::Volume => "volume",
            Self::Punctuation => "punctuation",
        }
    }
}

/// Escape a character for use inside SSML text
fn escape_ssml(c: char) -> String {
    match c {
        '<' => "&lt;".to_string(),
        '>' => "&gt;".to_string(),
        '&' => "&amp;".to_string(),
        '"' => "&quot;".to_string(),
        '\'' => "&apos;".to_string(),
        other => other.to_string(),
    }
}

/// SSML that makes the engine spell `c` rather than read it as a word
#[must_use]
pub fn spell_character(c: char) -> String {
    if c == ' ' {
        "<say-as interpret-as=\"tts:char\">&#32;</say-as>".to_string()
    } else {
        format!(
            "<say-as interpret-as=\"characters\">{}</say-as>",
            escape_ssml(c)
        )
    }
}

/// Drives a [`SpeechEngine`] on behalf of the synth worker
pub struct EngineAdapter {
    engine: Box<dyn SpeechEngine>,
    settings: VoiceSettings,
    callback: Option<SynthCallback>,
    generation: Arc<Generation>,
    mode: OutputMode,
    buffer_ms: u32,
    spell_single_characters: bool,
    paused: bool,
    sample_rate: Option<u32>,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("settings", &self.settings)
            .field("mode", &self.mode)
            .field("paused", &self.paused)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl EngineAdapter {
    /// Wrap `engine`; it stays stopped until [`initialize`](Self::initialize)
    /// or the first command.
    #[must_use]
    pub fn new(
        engine: Box<dyn SpeechEngine>,
        config: &PipelineConfig,
        generation: Arc<Generation>,
    ) -> Self {
        Self {
            engine,
            settings: config.defaults.clone(),
            callback: None,
            generation,
            mode: config.output_mode,
            buffer_ms: config.engine_buffer_ms,
            spell_single_characters: config.spell_single_characters,
            paused: true,
            sample_rate: None,
        }
    }

    /// Register the callback handed to the engine on every (re)start
    pub fn set_callback(&mut self, callback: SynthCallback) {
        if !self.paused {
            self.engine.set_callback(Arc::clone(&callback));
        }
        self.callback = Some(callback);
    }

    /// Start the engine and send it the full parameter set.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be initialized
    pub fn initialize(&mut self) -> SpeakbridgeResult<u32> {
        let rate = self.engine.initialize(self.mode, self.buffer_ms).map_err(|e| {
            error!("Unable to initialize speech engine: {}", e);
            e
        })?;
        if let Some(callback) = &self.callback {
            self.engine.set_callback(Arc::clone(callback));
        }
        self.sample_rate = Some(rate);
        self.paused = false;
        self.resend_settings();
        info!(sample_rate = rate, "Speech engine initialized");
        Ok(rate)
    }

    /// Push the mirrored settings to a freshly started engine
    fn resend_settings(&mut self) {
        if !self.settings.voice.is_empty() {
            let voice = self.settings.voice.clone();
            if let Err(e) = self.select_voice(&voice) {
                warn!("Unable to restore voice '{}': {}", voice, e);
            }
        }
        for field in VoiceField::ALL {
            let value = field.scale(field.get(&self.settings));
            if let Err(e) = self.engine.set_parameter(field.parameter(), value) {
                warn!("Unable to restore {}: {}", field.name(), e);
            }
        }
        if let Err(e) = self.engine.set_parameter(EngineParameter::Capitals, 0) {
            warn!("Unable to disable capital indication: {}", e);
        }
    }

    /// Apply one command.
    ///
    /// Parameter changes are committed to [`settings`](Self::settings) only
    /// when the engine accepts them.
    ///
    /// # Errors
    ///
    /// Propagates engine errors; retriable ones leave the command to be
    /// tried again
    pub fn apply(&mut self, command: &Command) -> SpeakbridgeResult<()> {
        if self.paused && !matches!(command, Command::Pause) {
            debug!("Restarting paused speech engine");
            self.initialize()?;
        }

        if let Some((field, adjust, value)) = VoiceField::of(command) {
            return self.set_field(field, adjust, value);
        }

        match command {
            Command::SetVoice(name) => {
                let voice = name.clone().unwrap_or_else(|| self.settings.voice.clone());
                if voice.is_empty() {
                    return Ok(());
                }
                self.select_voice(&voice)?;
                self.settings.voice = voice;
                Ok(())
            }
            Command::Mark(index) => {
                self.synth(&format!("<mark name=\"{index}\"/>"), SynthFlags { ssml: true })
            }
            Command::SpeakText(_) => match command.text() {
                Some(text) => self.speak(&text),
                None => Ok(()),
            },
            Command::Pause => {
                self.pause();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn set_field(&mut self, field: VoiceField, adjust: Adjust, value: i32) -> SpeakbridgeResult<()> {
        let next = adjust.apply(field.get(&self.settings), value);
        self.engine.set_parameter(field.parameter(), field.scale(next))?;
        field.set(&mut self.settings, next);
        debug!(parameter = field.name(), value = next, "Voice parameter set");
        Ok(())
    }

    fn select_voice(&mut self, voice: &str) -> SpeakbridgeResult<()> {
        self.engine
            .set_voice_by_name(voice)
            .or_else(|_| self.engine.set_voice_by_language(voice))
    }

    fn speak(&mut self, text: &str) -> SpeakbridgeResult<()> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if self.spell_single_characters => {
                self.synth(&spell_character(c), SynthFlags { ssml: true })
            }
            _ => self.synth(text, SynthFlags::default()),
        }
    }

    fn synth(&mut self, text: &str, flags: SynthFlags) -> SpeakbridgeResult<()> {
        let tag = self.generation.current();
        self.engine.synth(text, flags, tag)
    }

    fn pause(&mut self) {
        if self.paused {
            return;
        }
        if let Err(e) = self.engine.cancel() {
            warn!("Cancel before pause failed: {}", e);
        }
        self.engine.terminate();
        self.paused = true;
        info!("Speech engine paused");
    }

    /// Abandon whatever the engine is synthesizing
    pub fn cancel(&mut self) {
        if self.paused {
            return;
        }
        if let Err(e) = self.engine.cancel() {
            warn!("Engine cancel failed: {}", e);
        }
    }

    /// Release the engine for good
    pub fn shutdown(&mut self) {
        if !self.paused {
            self.engine.terminate();
            self.paused = true;
        }
    }

    /// The effective voice parameters
    #[must_use]
    pub const fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    /// Whether the engine is currently released
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Sample rate reported by the last engine start
    #[must_use]
    pub const fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpeakbridgeError;
    use mockall::predicate::{always, eq};

    fn permissive_engine() -> MockSpeechEngine {
        let mut engine = MockSpeechEngine::new();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_callback().return_const(());
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine.expect_set_voice_by_name().returning(|_| Ok(()));
        engine.expect_set_voice_by_language().returning(|_| Ok(()));
        engine.expect_synth().returning(|_, _, _| Ok(()));
        engine.expect_cancel().returning(|| Ok(()));
        engine.expect_terminate().return_const(());
        engine
    }

    fn adapter(engine: MockSpeechEngine) -> EngineAdapter {
        EngineAdapter::new(
            Box::new(engine),
            &PipelineConfig::default(),
            Arc::new(Generation::new()),
        )
    }

    #[test]
    fn test_scale_matches_engine_units() {
        assert_eq!(VoiceField::Frequency.scale(5), 55);
        assert_eq!(VoiceField::Pitch.scale(5), 55);
        assert_eq!(VoiceField::Rate.scale(2), 162);
        assert_eq!(VoiceField::Volume.scale(5), 132);
        assert_eq!(VoiceField::Punctuation.scale(2), 2);
    }

    #[test]
    fn test_initialize_sends_full_parameter_set() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_initialize().times(1).returning(|_, _| Ok(16_000));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Range), eq(55))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Pitch), eq(55))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Rate), eq(162))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Volume), eq(132))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Punctuation), eq(0))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Capitals), eq(0))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut adapter = adapter(engine);
        assert_eq!(adapter.initialize().unwrap(), 16_000);
        assert!(!adapter.is_paused());
        assert_eq!(adapter.sample_rate(), Some(16_000));
    }

    #[test]
    fn test_relative_adjustments_are_idempotent() {
        let mut adapter = adapter(permissive_engine());
        adapter.apply(&Command::SetPitch(Adjust::Absolute, 5)).unwrap();
        adapter.apply(&Command::SetPitch(Adjust::Increment, 0)).unwrap();
        assert_eq!(adapter.settings().pitch, 5);

        let before = adapter.settings().clone();
        adapter.apply(&Command::SetRate(Adjust::Increment, 3)).unwrap();
        adapter.apply(&Command::SetRate(Adjust::Decrement, 3)).unwrap();
        assert_eq!(adapter.settings(), &before);
    }

    #[test]
    fn test_rejected_parameter_leaves_settings() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine
            .expect_set_parameter()
            .with(eq(EngineParameter::Volume), eq(220))
            .returning(|_, _| Err(SpeakbridgeError::parameter_rejected("volume", "too loud")));
        engine.expect_set_parameter().returning(|_, _| Ok(()));

        let mut adapter = adapter(engine);
        let err = adapter
            .apply(&Command::SetVolume(Adjust::Absolute, 9))
            .unwrap_err();
        assert!(!err.is_retriable());
        assert_eq!(adapter.settings().volume, 5);
    }

    #[test]
    fn test_single_character_is_spelled() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine
            .expect_synth()
            .with(
                eq("<say-as interpret-as=\"characters\">&lt;</say-as>"),
                eq(SynthFlags { ssml: true }),
                eq(0u64),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));
        engine
            .expect_synth()
            .with(eq("<"), always(), always())
            .never();

        let mut adapter = adapter(engine);
        adapter.apply(&Command::SpeakText(b"<".to_vec())).unwrap();
    }

    #[test]
    fn test_spell_space() {
        assert_eq!(
            spell_character(' '),
            "<say-as interpret-as=\"tts:char\">&#32;</say-as>"
        );
        assert_eq!(
            spell_character('a'),
            "<say-as interpret-as=\"characters\">a</say-as>"
        );
    }

    #[test]
    fn test_text_is_tagged_with_generation() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine
            .expect_synth()
            .with(eq("hello"), eq(SynthFlags::default()), eq(3u64))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let generation = Arc::new(Generation::new());
        generation.advance();
        generation.advance();
        generation.advance();
        let mut adapter = EngineAdapter::new(Box::new(engine), &PipelineConfig::default(), generation);
        adapter.apply(&Command::SpeakText(b"hello".to_vec())).unwrap();
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine
            .expect_synth()
            .with(eq("a\u{fffd}b"), eq(SynthFlags::default()), eq(0u64))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let command = Command::SpeakText(vec![b'a', 0xff, b'b']);
        assert_eq!(command.text().as_deref(), Some("a\u{fffd}b"));
        let mut adapter = adapter(engine);
        adapter.apply(&command).unwrap();
    }

    #[test]
    fn test_pause_then_command_reinitializes() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_initialize().times(2).returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine.expect_cancel().times(1).returning(|| Ok(()));
        engine.expect_terminate().times(1).return_const(());
        engine.expect_synth().times(1).returning(|_, _, _| Ok(()));

        let mut adapter = adapter(engine);
        adapter.initialize().unwrap();
        adapter.apply(&Command::Pause).unwrap();
        assert!(adapter.is_paused());
        // A second pause is a no-op.
        adapter.apply(&Command::Pause).unwrap();

        adapter.apply(&Command::SpeakText(b"back".to_vec())).unwrap();
        assert!(!adapter.is_paused());
    }

    #[test]
    fn test_voice_falls_back_to_language() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine
            .expect_set_voice_by_name()
            .returning(|_| Err(SpeakbridgeError::parameter_rejected("voice", "no such voice")));
        engine
            .expect_set_voice_by_language()
            .with(eq("fr"))
            .times(2)
            .returning(|_| Ok(()));

        let mut adapter = adapter(engine);
        adapter.apply(&Command::SetVoice(Some("fr".to_string()))).unwrap();
        assert_eq!(adapter.settings().voice, "fr");

        // Re-applying the current voice goes through the engine again.
        adapter.apply(&Command::SetVoice(None)).unwrap();
        assert_eq!(adapter.settings().voice, "fr");
    }

    #[test]
    fn test_mark_is_ssml() {
        let mut engine = permissive_engine();
        engine.checkpoint();
        engine.expect_initialize().returning(|_, _| Ok(22_050));
        engine.expect_set_parameter().returning(|_, _| Ok(()));
        engine
            .expect_synth()
            .with(eq("<mark name=\"7\"/>"), eq(SynthFlags { ssml: true }), always())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut adapter = adapter(engine);
        adapter.apply(&Command::Mark(7)).unwrap();
    }

    #[test]
    fn test_fold_matches_adapter() {
        let commands = vec![
            Command::SetPitch(Adjust::Absolute, 3),
            Command::SetRate(Adjust::Increment, 4),
            Command::SpeakText(b"ignored".to_vec()),
            Command::SetVolume(Adjust::Decrement, 2),
            Command::SetFrequency(Adjust::Increment, 1),
            Command::SetPunctuation(Adjust::Absolute, 2),
        ];

        let mut folded = VoiceSettings::default();
        for command in &commands {
            folded.fold(command);
        }

        let mut adapter = adapter(permissive_engine());
        for command in &commands {
            adapter.apply(command).unwrap();
        }
        assert_eq!(adapter.settings(), &folded);
    }
}
