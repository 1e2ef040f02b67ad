//! Keystroke buffering.
//!
//! A keyboard-wedge scanner types the barcode one key at a time and finishes
//! with enter. [`Tokenizer`] turns that stream into [`Token`]s. It owns the
//! in-progress buffer and the time of the last keystroke; callers pass the
//! current [`Instant`] in so tests can drive time explicitly.

use crate::record::ScanStatus;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key that finalizes the buffer.
pub const TERMINATOR_KEY: &str = "enter";
/// Key name that stands for a literal space.
pub const SPACE_KEY: &str = "space";
/// Buffered keys beyond this count are treated as runaway input.
pub const MAX_BUFFER_LEN: usize = 100;
/// Barcodes shorter than this (after trimming) are tagged INVALID.
pub const MIN_BARCODE_LEN: usize = 3;
/// Idle time after which a partial buffer is finalized.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
/// How often the owner should call [`Tokenizer::check_timeout`].
pub const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Raw key event as delivered by an input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub name: String,
    pub is_down: bool,
}

impl KeyEvent {
    pub fn down(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_down: true,
        }
    }

    pub fn up(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_down: false,
        }
    }
}

/// A finalized barcode candidate and its status tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub barcode: String,
    pub status: ScanStatus,
}

#[derive(Debug)]
pub struct Tokenizer {
    buffer: Vec<String>,
    last_keystroke: Option<Instant>,
    idle_timeout: Duration,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl Tokenizer {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            last_keystroke: None,
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Number of keys currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feed one key event. Returns a token when enter closes a non-empty buffer.
    pub fn on_key(&mut self, event: &KeyEvent, now: Instant) -> Option<Token> {
        if !event.is_down {
            return None;
        }

        if event.name == TERMINATOR_KEY {
            if self.buffer.is_empty() {
                return None;
            }
            let barcode = self.take_buffer();
            let status = if barcode.chars().count() < MIN_BARCODE_LEN {
                warn!("Invalid barcode format: {:?}", barcode);
                ScanStatus::Invalid
            } else {
                ScanStatus::Success
            };
            return Some(Token { barcode, status });
        }

        if event.name.chars().count() != 1 && event.name != SPACE_KEY {
            debug!("Ignoring key {:?}", event.name);
            return None;
        }

        self.buffer.push(event.name.clone());
        self.last_keystroke = Some(now);

        if self.buffer.len() > MAX_BUFFER_LEN {
            warn!(
                "Barcode buffer overflow ({} keys), clearing",
                self.buffer.len()
            );
            self.clear();
        }
        None
    }

    /// Finalize a partial buffer as TIMEOUT once it has been idle too long.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Token> {
        let last = self.last_keystroke?;
        if self.buffer.is_empty() || now.saturating_duration_since(last) <= self.idle_timeout {
            return None;
        }
        let barcode = self.take_buffer();
        warn!("Barcode input timeout, finalizing partial buffer: {:?}", barcode);
        Some(Token {
            barcode,
            status: ScanStatus::Timeout,
        })
    }

    fn take_buffer(&mut self) -> String {
        let joined: String = self
            .buffer
            .iter()
            .map(|key| if key == SPACE_KEY { " " } else { key.as_str() })
            .collect();
        self.clear();
        joined.trim().to_string()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.last_keystroke = None;
    }
}
