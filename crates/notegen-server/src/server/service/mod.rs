//! HTTP service implementation.
//!
//! This module maps client-facing HTTP requests onto the session manager and
//! the rooted file endpoints.
//!
//! ## Structure
//!
//! - [`handler`] - Router, shared state and endpoint handlers.
//! - [`files`] - Path confinement, listings and static file serving.

pub mod files;
pub mod handler;
