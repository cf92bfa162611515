//! Runs one model call on a blocking thread.
//!
//! The worker forwards every note the model emits into the session's
//! [`NoteSender`] and always finishes the channel, whether the model
//! returned normally, returned an error, or panicked.

use super::{
    channel::{NoteSender, Termination},
    registry::CancellationSignal,
};
use crate::server::telemetry::increment_worker_failures;
use core::panic::AssertUnwindSafe;
use notegen_core::{
    model::{GenerationRequest, Model, NoteSink},
    types::NoteEvent,
};
use std::{any::Any, sync::Arc};
use tokio::task::JoinHandle;

/// Adapts a [`NoteSender`] and [`CancellationSignal`] to the model-facing
/// [`NoteSink`] interface.
struct ChannelSink<'a> {
    sender: &'a NoteSender,
    signal: &'a CancellationSignal,
}

impl NoteSink for ChannelSink<'_> {
    fn emit(&mut self, note: NoteEvent) {
        // Notes pushed after the consumer left are dropped.
        self.sender.push(note);
    }

    fn is_cancelled(&self) -> bool {
        self.signal.is_set() || !self.sender.is_attached()
    }
}

pub struct GenerationWorker;

impl GenerationWorker {
    /// Starts the model on the blocking pool and returns immediately.
    ///
    /// The returned handle resolves to the same [`Termination`] that was
    /// pushed into the channel. Awaiting it is optional; the channel alone
    /// tells the consumer when the worker is done.
    pub fn start(
        model: Arc<dyn Model>,
        request: GenerationRequest,
        sender: NoteSender,
        signal: CancellationSignal,
    ) -> JoinHandle<Termination> {
        tokio::task::spawn_blocking(move || Self::run(model.as_ref(), &request, sender, &signal))
    }

    /// Runs the model to completion on the current thread.
    pub fn run(
        model: &dyn Model,
        request: &GenerationRequest,
        sender: NoteSender,
        signal: &CancellationSignal,
    ) -> Termination {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut sink = ChannelSink {
                sender: &sender,
                signal,
            };
            model.generate(request, &mut sink)
        }));

        let termination = match outcome {
            Ok(Ok(())) => Termination::Completed,
            Ok(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Model returned an error: {e}");
                increment_worker_failures();
                Termination::Failed(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                #[cfg(feature = "tracing")]
                tracing::error!("Model panicked: {reason}");
                increment_worker_failures();
                Termination::Failed(reason)
            }
        };

        sender.finish(termination.clone());
        termination
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("model panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("model panicked: {s}")
    } else {
        "model panicked".to_string()
    }
}
