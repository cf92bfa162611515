#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{CliArgs, FailurePolicy, ServerConfig},
    service::handler::{AppState, router},
    session::{
        coordinator::{NoteStream, SessionCoordinator},
        registry::{CancellationRegistry, CancellationSignal},
    },
};
