//! Built-in structure-aware replay model.
//!
//! [`ReplayModel`] continues a song by copying material it has already seen.
//! It is deterministic and needs no weights, which makes it useful for local
//! frontend development and for exercising the streaming path end to end.
//!
//! For every target bar covered by a segment labelled `L`, at offset `k` into
//! that segment:
//!
//! 1. Bar `k` of the earliest earlier `L` segment, when one exists before the
//!    target range.
//! 2. Otherwise, the seed region `[seed_start_bar, target_start_bar)`, cycled.
//!
//! Bars not covered by any segment are left empty, as are bars past the last
//! one the `u32` frame grid can hold.

use crate::common::{
    model::{GenerationRequest, Model, ModelError, NoteSink},
    params::SegmentInfo,
    pianoroll::PianorollNote,
};
use core::time::Duration;

#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayModel {
    note_delay: Duration,
}

impl ReplayModel {
    pub const fn new() -> Self {
        Self {
            note_delay: Duration::ZERO,
        }
    }

    /// Sleeps for `delay` before every emitted note, to mimic inference
    /// latency.
    pub const fn with_note_delay(delay: Duration) -> Self {
        Self { note_delay: delay }
    }

    fn source_bar(request: &GenerationRequest, segment: &SegmentInfo, bar: u32) -> Option<u32> {
        let target_start = request.target_start_bar;
        let offset = bar - segment.start_bar;

        let by_label = request
            .segments
            .iter()
            .filter(|s| s.label == segment.label && s.end_bar <= target_start)
            .filter(|s| offset < s.len_bars())
            .min_by_key(|s| s.start_bar)
            .map(|s| s.start_bar + offset);

        by_label.or_else(|| {
            let seed_start = request.seed_start_bar.unwrap_or(0).min(target_start);
            let seed_len = target_start - seed_start;
            (seed_len > 0).then(|| seed_start + (bar - target_start) % seed_len)
        })
    }

    /// First segment start after `bar`, used to jump over uncovered gaps.
    fn next_segment_start(request: &GenerationRequest, bar: u32) -> Option<u32> {
        request
            .segments
            .iter()
            .map(|s| s.start_bar)
            .filter(|&start| start > bar)
            .min()
    }
}

impl Model for ReplayModel {
    fn generate(
        &self,
        request: &GenerationRequest,
        sink: &mut dyn NoteSink,
    ) -> Result<(), ModelError> {
        let roll = &request.pianoroll;
        let frames_per_bar = roll.frames_per_bar();
        if frames_per_bar == 0 {
            return Err(ModelError::new("pianoroll has a zero-length bar"));
        }

        // A zero duration leaves the range bounded only by the frame grid.
        let mut end_bar = request.target_end_bar.min(u32::MAX / frames_per_bar);
        if roll.duration() > 0 {
            end_bar = end_bar.min(roll.duration().div_ceil(frames_per_bar));
        }

        let mut bar = request.target_start_bar;
        while bar < end_bar {
            if sink.is_cancelled() {
                return Ok(());
            }
            let Some(segment) = request.segment_at(bar) else {
                match Self::next_segment_start(request, bar) {
                    Some(next) => bar = next,
                    None => break,
                }
                continue;
            };
            let Some(source) = Self::source_bar(request, segment, bar) else {
                bar += 1;
                continue;
            };

            let source_start = source * frames_per_bar;
            let bar_start = bar * frames_per_bar;
            for note in roll.notes_in_bar(source) {
                if sink.is_cancelled() {
                    return Ok(());
                }
                if !self.note_delay.is_zero() {
                    std::thread::sleep(self.note_delay);
                }

                let Some(onset) = (note.onset - source_start).checked_add(bar_start) else {
                    return Ok(());
                };
                let shifted = PianorollNote {
                    onset,
                    offset: onset.saturating_add(note.offset - note.onset),
                    ..*note
                };
                sink.emit(roll.to_note_event(&shifted));
            }
            bar += 1;
        }

        Ok(())
    }
}
