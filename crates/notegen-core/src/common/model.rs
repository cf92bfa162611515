//! The generation model interface.
//!
//! A [`Model`] is a blocking, possibly long-running computation. The server
//! runs it on a dedicated blocking thread and hands it a [`NoteSink`]; every
//! note pushed into the sink is streamed to the client as soon as it is
//! produced.

use crate::common::{
    params::{GenerateParams, SegmentInfo},
    pianoroll::Pianoroll,
    types::NoteEvent,
};
use core::fmt;

/// Receives notes from a running model.
///
/// `emit` never blocks. `is_cancelled` reports whether the session that owns
/// this sink has been preempted or abandoned; models may poll it to stop
/// early, but are not required to.
pub trait NoteSink {
    fn emit(&mut self, note: NoteEvent);

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl NoteSink for Vec<NoteEvent> {
    fn emit(&mut self, note: NoteEvent) {
        self.push(note);
    }
}

/// Error raised by a model implementation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ModelError {
    message: String,
}

impl ModelError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Everything the model needs for one generation call.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub segments: Vec<SegmentInfo>,
    pub pianoroll: Pianoroll,
    pub target_start_bar: u32,
    pub target_end_bar: u32,
    pub seed_start_bar: Option<u32>,
}

impl GenerationRequest {
    /// Derives the model call from validated parameters.
    ///
    /// Beats are converted to bars with integer division, and the pianoroll
    /// is resized to the declared song length.
    pub fn from_params(params: &GenerateParams, mut pianoroll: Pianoroll) -> Self {
        let beats_per_bar = pianoroll.beats_per_bar().max(1);
        pianoroll.set_duration(
            params
                .song_duration
                .saturating_mul(pianoroll.frames_per_beat()),
        );

        Self {
            segments: params.segments.clone(),
            target_start_bar: params.range_to_generate.start_beat / beats_per_bar,
            target_end_bar: params.range_to_generate.end_beat / beats_per_bar,
            seed_start_bar: params.seed_start_bar(),
            pianoroll,
        }
    }

    /// The segment covering `bar`, if any.
    pub fn segment_at(&self, bar: u32) -> Option<&SegmentInfo> {
        self.segments.iter().find(|s| s.contains_bar(bar))
    }
}

/// A generative music model.
///
/// `generate` is called exactly once per session, on a blocking thread.
pub trait Model: Send + Sync {
    /// # Errors
    ///
    /// Implementations return [`ModelError`] when generation cannot proceed.
    /// Notes already emitted are still delivered.
    fn generate(
        &self,
        request: &GenerationRequest,
        sink: &mut dyn NoteSink,
    ) -> Result<(), ModelError>;
}
