//! # Core note and session types
//!
//! This module defines the value types shared by the model, the session
//! manager and the wire encoder.
//!
//! ## Types
//!
//! - [`NoteEvent`] - A single generated note, in beats.
//! - [`ClientId`] - The caller-chosen key used to preempt stale sessions.
//!
//! ## Constants
//!
//! - [`FRAMES_PER_BEAT`] - Default pianoroll resolution.
//! - [`BEATS_PER_BAR`] - Default bar length used for bar/beat conversion.
//! - [`MAX_CLIENT_ID_LEN`] - Upper bound on client id length, in bytes.

use crate::common::error::Error;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of pianoroll frames per beat.
pub const FRAMES_PER_BEAT: u32 = 8;

/// Number of beats per bar.
pub const BEATS_PER_BAR: u32 = 4;

/// Longest accepted client id, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 256;

/// A note produced by the generation model.
///
/// `onset` and `duration` are expressed in beats from the start of the song.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub onset: f64,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: f64,
}

impl NoteEvent {
    pub const fn new(onset: f64, pitch: u8, velocity: u8, duration: f64) -> Self {
        Self {
            onset,
            pitch,
            velocity,
            duration,
        }
    }

    /// Beat at which the note stops sounding.
    pub fn offset(&self) -> f64 {
        self.onset + self.duration
    }
}

/// Opaque identifier supplied by the client with every generation request.
///
/// No uniqueness is enforced: a second request carrying the same id is how a
/// client cancels its own in-flight generation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(Error::invalid("client_id must not be empty"));
        }
        if value.len() > MAX_CLIENT_ID_LEN {
            return Err(Error::invalid(format!(
                "client_id exceeds {MAX_CLIENT_ID_LEN} bytes"
            )));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for ClientId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
