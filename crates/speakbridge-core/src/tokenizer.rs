//! Turns raw softsynth bytes into [`Command`]s.
//!
//! The stream is plain text interleaved with control sequences. A command
//! starts with [`COMMAND_INTRODUCER`], followed by an optional `+`/`-`, a
//! decimal value and a selector letter, e.g. `"\x01+2p"` raises the pitch by
//! two. [`FLUSH_BYTE`] cancels everything spoken or queued before it.
//!
//! A command cut short by the end of the buffer consumes the remaining bytes
//! and produces nothing.

use crate::command::{Adjust, Command};
use crate::{COMMAND_INTRODUCER, FLUSH_BYTE};

/// Whether `byte` belongs in a text run.
///
/// Bytes with the high bit set count as printable so that multi-byte
/// encodings pass through untouched.
#[must_use]
pub const fn is_printable(byte: u8) -> bool {
    byte >= 0x20
}

/// Split `buf` at its last flush byte.
///
/// Returns `true` and the bytes after the flush when one is present,
/// otherwise `false` and the whole buffer.
#[must_use]
pub fn split_at_flush(buf: &[u8]) -> (bool, &[u8]) {
    match buf.iter().rposition(|&b| b == FLUSH_BYTE) {
        Some(idx) => (true, &buf[idx + 1..]),
        None => (false, buf),
    }
}

/// Lazy scanner over one device buffer
#[derive(Debug)]
pub struct Tokenizer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Start scanning `buf` from the beginning
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Parse the body of a command; the introducer is already consumed.
    fn parse_command(&mut self) -> Option<Command> {
        let adjust = match self.peek()? {
            b'+' => {
                self.pos += 1;
                Adjust::Increment
            }
            b'-' => {
                self.pos += 1;
                Adjust::Decrement
            }
            _ => Adjust::Absolute,
        };

        let mut value: i32 = 0;
        while let Some(digit) = self.peek().filter(u8::is_ascii_digit) {
            value = value
                .saturating_mul(10)
                .saturating_add(i32::from(digit - b'0'));
            self.pos += 1;
        }

        let selector = self.peek()?;
        if !selector.is_ascii_alphabetic() {
            // Leave the byte in place; it starts the next text run.
            return Some(Command::Unknown(selector));
        }
        self.pos += 1;

        Some(match selector {
            b'f' => Command::SetFrequency(adjust, value),
            b'p' => Command::SetPitch(adjust, value),
            b's' => Command::SetRate(adjust, value),
            b'v' => Command::SetVolume(adjust, value),
            b'b' => Command::SetPunctuation(adjust, value),
            b'i' => Command::Mark(value),
            b'P' => Command::Pause,
            other => Command::Unknown(other),
        })
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Command;

    fn next(&mut self) -> Option<Command> {
        loop {
            let start = self.pos;
            while self.peek().is_some_and(is_printable) {
                self.pos += 1;
            }
            if self.pos > start {
                return Some(Command::SpeakText(self.buf[start..self.pos].to_vec()));
            }

            let control = self.peek()?;
            self.pos += 1;
            match control {
                COMMAND_INTRODUCER => match self.parse_command() {
                    Some(cmd) => return Some(cmd),
                    None => {
                        self.pos = self.buf.len();
                        return None;
                    }
                },
                FLUSH_BYTE => return Some(Command::Flush),
                _ => {}
            }
        }
    }
}

/// Tokenize `buf` and keep only the commands worth queueing.
pub fn queueable_commands(buf: &[u8]) -> impl Iterator<Item = Command> + '_ {
    Tokenizer::new(buf).filter(Command::is_queueable)
}
