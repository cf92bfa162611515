//! Frame-quantized pianoroll and the MIDI adapter that produces it.
//!
//! A [`Pianoroll`] is the model-facing view of the uploaded MIDI file: every
//! note is snapped to a grid of `frames_per_beat` frames, and bars are
//! `beats_per_bar` beats long.

use crate::common::{
    error::{Error, Result},
    types::NoteEvent,
};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u28},
};
use std::collections::{HashMap, VecDeque};

/// Resolution assumed for SMPTE-timed files, which carry no beat grid.
const FALLBACK_TICKS_PER_BEAT: u64 = 480;

/// A note on the frame grid, `[onset, offset)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PianorollNote {
    pub onset: u32,
    pub pitch: u8,
    pub velocity: u8,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pianoroll {
    frames_per_beat: u32,
    beats_per_bar: u32,
    /// Song length in frames.
    duration: u32,
    /// Sorted by onset, then pitch.
    notes: Vec<PianorollNote>,
}

impl Pianoroll {
    /// Builds a pianoroll from already-quantized notes.
    ///
    /// Notes are sorted and zero-length notes are stretched to one frame. The
    /// duration covers the last offset.
    pub fn from_notes(
        mut notes: Vec<PianorollNote>,
        frames_per_beat: u32,
        beats_per_bar: u32,
    ) -> Self {
        for note in &mut notes {
            if note.offset <= note.onset {
                note.offset = note.onset.saturating_add(1);
            }
        }
        notes.sort_unstable();
        let duration = notes.iter().map(|n| n.offset).max().unwrap_or(0);

        Self {
            frames_per_beat,
            beats_per_bar,
            duration,
            notes,
        }
    }

    /// Decodes a Standard MIDI File and quantizes every note onto the frame
    /// grid.
    ///
    /// Note-on events with velocity 0 are treated as note-off. Overlapping
    /// notes on the same channel and key are paired first-in, first-out, and
    /// notes still sounding at the end of their track are closed there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the bytes are not a valid SMF, or
    /// if a note lies past the last frame the grid can hold.
    pub fn from_midi(bytes: &[u8], frames_per_beat: u32, beats_per_bar: u32) -> Result<Self> {
        let smf = Smf::parse(bytes).map_err(|e| Error::invalid(format!("midi_file: {e}")))?;

        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(t) => u64::from(t.as_int()).max(1),
            Timing::Timecode(_fps, _subframe) => FALLBACK_TICKS_PER_BEAT,
        };
        // The last frame is kept free so every note can end one frame later.
        let to_frame = |tick: u64| -> Result<u32> {
            tick.checked_mul(u64::from(frames_per_beat))
                .and_then(|t| t.checked_add(ticks_per_beat / 2))
                .and_then(|t| u32::try_from(t / ticks_per_beat).ok())
                .filter(|&frame| frame < u32::MAX)
                .ok_or_else(|| {
                    Error::invalid(format!("midi_file: tick {tick} is beyond the frame grid"))
                })
        };

        let mut notes = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0_u64;
            let mut sounding: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();

            for event in track {
                tick += u64::from(event.delta.as_int());

                let TrackEventKind::Midi { channel, message } = event.kind else {
                    continue;
                };
                let channel = channel.as_int();
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        sounding
                            .entry((channel, key.as_int()))
                            .or_default()
                            .push_back((tick, vel.as_int()));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        let pitch = key.as_int();
                        if let Some((start, velocity)) = sounding
                            .get_mut(&(channel, pitch))
                            .and_then(VecDeque::pop_front)
                        {
                            notes.push(PianorollNote {
                                onset: to_frame(start)?,
                                pitch,
                                velocity,
                                offset: to_frame(tick)?,
                            });
                        }
                    }
                    _ => {}
                }
            }

            for ((_channel, pitch), pending) in sounding {
                for (start, velocity) in pending {
                    notes.push(PianorollNote {
                        onset: to_frame(start)?,
                        pitch,
                        velocity,
                        offset: to_frame(tick)?,
                    });
                }
            }
        }

        Ok(Self::from_notes(notes, frames_per_beat, beats_per_bar))
    }

    /// Encodes the pianoroll as a single-track Standard MIDI File.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the encoder fails to write.
    pub fn to_midi(&self, ticks_per_beat: u16) -> Result<Vec<u8>> {
        let ticks_per_frame = u32::from(ticks_per_beat) / self.frames_per_beat.max(1);

        // (tick, is_on, pitch, velocity); offs sort before ons on the same tick
        let mut events: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(self.notes.len() * 2);
        for note in &self.notes {
            let on = note.onset.saturating_mul(ticks_per_frame);
            let off = note.offset.saturating_mul(ticks_per_frame);
            events.push((on, true, note.pitch, note.velocity));
            events.push((off, false, note.pitch, 0));
        }
        events.sort_unstable();

        let mut track = Vec::with_capacity(events.len() + 1);
        let mut last = 0;
        for (tick, is_on, pitch, velocity) in events {
            let key = u7::from_int_lossy(pitch);
            let vel = u7::from_int_lossy(velocity);
            let message = if is_on {
                MidiMessage::NoteOn { key, vel }
            } else {
                MidiMessage::NoteOff { key, vel }
            };
            track.push(TrackEvent {
                delta: u28::from_int_lossy(tick - last),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message,
                },
            });
            last = tick;
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::from_int_lossy(ticks_per_beat)),
        ));
        smf.tracks.push(track);

        let mut out = Vec::new();
        smf.write_std(&mut out).map_err(|e| Error::Io {
            context: format!("failed to encode midi: {e}"),
        })?;
        Ok(out)
    }

    pub const fn frames_per_beat(&self) -> u32 {
        self.frames_per_beat
    }

    pub const fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub const fn frames_per_bar(&self) -> u32 {
        self.frames_per_beat * self.beats_per_bar
    }

    pub const fn duration(&self) -> u32 {
        self.duration
    }

    pub fn set_duration(&mut self, frames: u32) {
        self.duration = frames;
    }

    pub fn notes(&self) -> &[PianorollNote] {
        &self.notes
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Notes whose onset falls inside `bar`.
    pub fn notes_in_bar(&self, bar: u32) -> &[PianorollNote] {
        let start = bar.saturating_mul(self.frames_per_bar());
        let end = start.saturating_add(self.frames_per_bar());
        let lo = self.notes.partition_point(|n| n.onset < start);
        let hi = self.notes.partition_point(|n| n.onset < end);
        &self.notes[lo..hi]
    }

    pub fn frame_to_beat(&self, frame: u32) -> f64 {
        f64::from(frame) / f64::from(self.frames_per_beat)
    }

    pub fn to_note_event(&self, note: &PianorollNote) -> NoteEvent {
        NoteEvent::new(
            self.frame_to_beat(note.onset),
            note.pitch,
            note.velocity,
            self.frame_to_beat(note.offset.saturating_sub(note.onset)),
        )
    }
}
