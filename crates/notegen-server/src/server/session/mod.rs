//! The streaming generation session manager.
//!
//! - [`channel`]: the per-session note queue.
//! - [`worker`]: runs the model on the blocking pool.
//! - [`registry`]: one active generation per client.
//! - [`coordinator`]: glues the three together into an HTTP body stream.

pub mod channel;
pub mod coordinator;
pub mod registry;
pub mod worker;
