//! Generation parameters submitted alongside the uploaded MIDI file.
//!
//! The wire form is snake_case JSON. camelCase aliases are accepted for
//! frontends that serialize their own state directly.

use crate::common::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Beat range the model should fill, `[start_beat, end_beat)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeToGenerate {
    #[serde(alias = "startBeat")]
    pub start_beat: u32,
    #[serde(alias = "endBeat")]
    pub end_beat: u32,
}

/// A labelled structural segment of the song, in bars, `[start_bar, end_bar)`.
///
/// Segments flagged `is_seed` mark existing material the model should
/// continue from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    #[serde(alias = "startBar")]
    pub start_bar: u32,
    #[serde(alias = "endBar")]
    pub end_bar: u32,
    pub label: String,
    #[serde(alias = "isSeed")]
    pub is_seed: bool,
}

impl SegmentInfo {
    pub fn contains_bar(&self, bar: u32) -> bool {
        (self.start_bar..self.end_bar).contains(&bar)
    }

    pub const fn len_bars(&self) -> u32 {
        self.end_bar - self.start_bar
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateParams {
    #[serde(alias = "rangeToGenerate")]
    pub range_to_generate: RangeToGenerate,
    pub segments: Vec<SegmentInfo>,
    /// Total song length in beats.
    #[serde(alias = "songDuration")]
    pub song_duration: u32,
}

impl GenerateParams {
    /// Decodes and validates the `params` form field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the JSON does not match the
    /// expected structure or if any range is inverted.
    pub fn from_json(raw: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(raw)
            .map_err(|e| Error::invalid(format!("params: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        let range = self.range_to_generate;
        if range.end_beat < range.start_beat {
            return Err(Error::invalid(format!(
                "range_to_generate end_beat ({}) precedes start_beat ({})",
                range.end_beat, range.start_beat
            )));
        }

        for (i, segment) in self.segments.iter().enumerate() {
            if segment.end_bar < segment.start_bar {
                return Err(Error::invalid(format!(
                    "segment {i} end_bar ({}) precedes start_bar ({})",
                    segment.end_bar, segment.start_bar
                )));
            }
            if segment.label.is_empty() {
                return Err(Error::invalid(format!("segment {i} has an empty label")));
            }
        }

        Ok(())
    }

    /// First bar of the seed material, if any segment is flagged as seed.
    pub fn seed_start_bar(&self) -> Option<u32> {
        self.segments
            .iter()
            .filter(|s| s.is_seed)
            .map(|s| s.start_bar)
            .min()
    }
}
