//! Newline-delimited JSON wire format for streamed notes.
//!
//! Every record is a single line terminated by `\n`, so a client can parse a
//! stream of concatenated records without length prefixes:
//!
//! ```text
//! [1.5,60,80,0.25]
//! [2.0,64,72,0.5]
//! ```
//!
//! A note is the array `[onset, pitch, velocity, duration]`. When the server
//! is configured to surface worker failures, the stream may end with a single
//! `{"error": "..."}` record.

use crate::common::{
    error::{Error, Result},
    types::NoteEvent,
};
use bytes::Bytes;
use serde::Deserialize;

/// Record delimiter.
pub const RECORD_DELIMITER: u8 = b'\n';

/// A decoded wire record.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamRecord {
    Note(NoteEvent),
    Failure(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Note(f64, u8, u8, f64),
    Failure { error: String },
}

/// Stateless encoder for note records.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamEncoder;

impl StreamEncoder {
    /// Encodes one note as a self-delimiting record.
    pub fn encode(note: &NoteEvent) -> Bytes {
        let mut line =
            serde_json::json!([note.onset, note.pitch, note.velocity, note.duration]).to_string();
        line.push(RECORD_DELIMITER as char);
        Bytes::from(line)
    }

    /// Encodes a terminal failure record.
    pub fn encode_failure(reason: &str) -> Bytes {
        let mut line = serde_json::json!({ "error": reason }).to_string();
        line.push(RECORD_DELIMITER as char);
        Bytes::from(line)
    }

    /// Encodes an error as the terminal failure record.
    pub fn encode_error(error: &Error) -> Bytes {
        Self::encode_failure(&error.to_string())
    }

    /// Parses a single record. A trailing delimiter is optional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the line is neither a note array
    /// nor a failure object.
    pub fn decode_record(line: &[u8]) -> Result<StreamRecord> {
        let line = line.strip_suffix(&[RECORD_DELIMITER]).unwrap_or(line);
        let raw: RawRecord = serde_json::from_slice(line)
            .map_err(|e| Error::invalid(format!("malformed record: {e}")))?;
        Ok(match raw {
            RawRecord::Note(onset, pitch, velocity, duration) => {
                StreamRecord::Note(NoteEvent::new(onset, pitch, velocity, duration))
            }
            RawRecord::Failure { error } => StreamRecord::Failure(error),
        })
    }

    /// Splits a concatenated body into its non-empty record lines.
    pub fn split_records(body: &[u8]) -> impl Iterator<Item = &[u8]> {
        body.split(|b| *b == RECORD_DELIMITER)
            .filter(|line| !line.is_empty())
    }
}
