//! Commands produced by the tokenizer and consumed by the synth worker.

use std::borrow::Cow;

/// How a parameter command changes the current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Adjust {
    /// Replace the current value
    Absolute,
    /// Add to the current value
    Increment,
    /// Subtract from the current value
    Decrement,
}

impl Adjust {
    /// Compute the value that results from applying `value` to `current`.
    #[must_use]
    pub const fn apply(self, current: i32, value: i32) -> i32 {
        match self {
            Self::Absolute => value,
            Self::Increment => current.saturating_add(value),
            Self::Decrement => current.saturating_sub(value),
        }
    }
}

/// A unit of work for the synth worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Change the voice frequency (intonation range)
    SetFrequency(Adjust, i32),
    /// Change the base pitch
    SetPitch(Adjust, i32),
    /// Change the speaking rate
    SetRate(Adjust, i32),
    /// Change the output volume
    SetVolume(Adjust, i32),
    /// Change how much punctuation is spoken
    SetPunctuation(Adjust, i32),
    /// Select a voice; `None` re-applies the current one
    SetVoice(Option<String>),
    /// Insert an index mark the engine reports back when it is reached
    Mark(i32),
    /// Release the engine until the next command arrives
    Pause,
    /// Speak a run of text
    SpeakText(Vec<u8>),
    /// Cancel everything currently speaking or queued
    Flush,
    /// An unrecognised command selector
    Unknown(u8),
}

impl Command {
    /// Short name used in log lines
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetFrequency(..) => "frequency",
            Self::SetPitch(..) => "pitch",
            Self::SetRate(..) => "rate",
            Self::SetVolume(..) => "volume",
            Self::SetPunctuation(..) => "punctuation",
            Self::SetVoice(_) => "voice",
            Self::Mark(_) => "mark",
            Self::Pause => "pause",
            Self::SpeakText(_) => "text",
            Self::Flush => "flush",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Whether the command is worth putting on the queue
    #[must_use]
    pub const fn is_queueable(&self) -> bool {
        !matches!(self, Self::Flush | Self::Unknown(_))
    }

    /// Text of a `SpeakText` command, decoded lossily
    #[must_use]
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::SpeakText(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}
