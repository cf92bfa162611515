//! Shared types and error definitions used across the notegen server and its
//! clients.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized service error type and its HTTP mapping.
//! - [`types`] - Note events, client ids and grid constants.
//! - [`params`] - Generation parameters and their validation.
//! - [`encoder`] - Newline-delimited JSON wire records.
//! - [`pianoroll`] - Frame-quantized pianoroll and the MIDI adapter.
//! - [`model`] - The [`Model`](model::Model) and [`NoteSink`](model::NoteSink)
//!   traits.
//! - [`replay`] - The built-in deterministic replay model.

pub mod encoder;
pub mod error;
pub mod model;
pub mod params;
pub mod pianoroll;
pub mod replay;
pub mod types;
