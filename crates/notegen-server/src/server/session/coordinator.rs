//! Turns one generation into one lazily-driven byte stream.
//!
//! [`SessionCoordinator::start`] does all the eager work (registering the
//! client, creating the channel, spawning the worker) and hands back a stream
//! that the HTTP layer uses as the response body. Everything after that is
//! driven by the body being polled:
//!
//! ```text
//! Starting -> Streaming -> Completed
//!                       -> Cancelled   (preempted, shut down, or body dropped)
//!                       -> Failed      (model error or panic)
//! ```
//!
//! Cleanup lives in a `Drop` guard owned by the stream, so it runs exactly once
//! no matter how the stream ends, including the client disconnecting while a
//! note is still being awaited.

use super::{
    channel::{ChannelItem, NoteReceiver, Termination, note_channel},
    registry::{CancellationRegistry, CancellationSignal},
    worker::GenerationWorker,
};
use crate::server::{
    config::FailurePolicy,
    telemetry::{
        decrement_sessions_inflight, increment_notes_streamed, increment_sessions_cancelled,
        increment_sessions_inflight, increment_sessions_started, record_session_duration,
    },
};
use bytes::Bytes;
use core::{
    convert::Infallible,
    pin::Pin,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use futures::{Stream, stream};
use notegen_core::{
    Error, Result, encoder::StreamEncoder, model::GenerationRequest, model::Model, types::ClientId,
};
use std::{sync::Arc, time::Instant};
use tokio::time::{sleep, timeout};

/// The response body of a generation session.
pub type NoteStream = Pin<Box<dyn Stream<Item = core::result::Result<Bytes, Infallible>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Owns the per-client registry and the model, and starts sessions.
pub struct SessionCoordinator {
    registry: Arc<CancellationRegistry>,
    model: Arc<dyn Model>,
    failure_policy: FailurePolicy,
    inflight: Arc<AtomicUsize>,
    shutting_down: AtomicBool,
}

impl SessionCoordinator {
    pub fn new(
        registry: Arc<CancellationRegistry>,
        model: Arc<dyn Model>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            registry,
            model,
            failure_policy,
            inflight: Arc::new(AtomicUsize::new(0)),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Number of sessions whose stream has not been dropped yet.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Starts a generation for `client` and returns its byte stream.
    ///
    /// Any generation already running for the same client is cancelled before
    /// the new worker starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`Self::shutdown`] has begun.
    pub fn start(&self, client: ClientId, request: GenerationRequest) -> Result<NoteStream> {
        if self.is_shutting_down() {
            return Err(Error::ServiceShutdown);
        }

        let signal = self.admit(&client)?;
        let (sender, receiver) = note_channel();

        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_sessions_started();
        increment_sessions_inflight();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Starting generation for client {client}: bars {}..{}",
            request.target_start_bar,
            request.target_end_bar
        );

        // The join handle is not awaited; the channel carries the outcome.
        let _ = GenerationWorker::start(
            Arc::clone(&self.model),
            request,
            sender,
            signal.clone(),
        );

        let session = Session {
            receiver,
            failure_policy: self.failure_policy,
            guard: SessionGuard {
                client,
                signal,
                registry: Arc::clone(&self.registry),
                inflight: Arc::clone(&self.inflight),
                started: Instant::now(),
                state: SessionState::Starting,
                notes: 0,
            },
        };

        let stream = stream::unfold(session, |mut session| async move {
            let chunk = session.next_chunk().await?;
            Some((Ok::<_, Infallible>(chunk), session))
        });

        Ok(Box::pin(stream))
    }

    /// Registers `client`, backing out if a shutdown began in the meantime.
    ///
    /// `shutdown` raises its flag before `cancel_all` takes the registry lock,
    /// so a registration that lands after `cancel_all` always sees the flag.
    fn admit(&self, client: &ClientId) -> Result<CancellationSignal> {
        let signal = self.registry.register(client);
        if self.is_shutting_down() {
            signal.set();
            let _ = self.registry.release(client, &signal);
            return Err(Error::ServiceShutdown);
        }
        Ok(signal)
    }

    /// Stops accepting sessions, cancels the running ones, and waits up to
    /// `wait` for their streams to be dropped.
    pub async fn shutdown(&self, wait: Duration) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new generation requests");
        self.shutting_down.store(true, Ordering::Release);

        let _cancelled = self.registry.cancel_all();
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Cancelled {_cancelled} active generations, draining {} sessions",
            self.inflight()
        );

        let drain = timeout(wait, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All sessions drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} sessions still active)",
                    self.inflight()
                );
            }
        }
    }
}

/// State carried from one poll of the response body to the next.
struct Session {
    receiver: NoteReceiver,
    failure_policy: FailurePolicy,
    guard: SessionGuard,
}

impl Session {
    /// Produces the next chunk of the body, or `None` once the session has
    /// reached a terminal state.
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.guard.state.is_terminal() {
            return None;
        }
        if self.guard.signal.is_set() {
            self.guard.state = SessionState::Cancelled;
            return None;
        }
        self.guard.state = SessionState::Streaming;

        let item = tokio::select! {
            biased;
            () = self.guard.signal.cancelled() => None,
            item = self.receiver.next() => Some(item),
        };

        match item {
            None => {
                self.guard.state = SessionState::Cancelled;
                None
            }
            Some(ChannelItem::Note(note)) => {
                self.guard.notes += 1;
                increment_notes_streamed(1);
                Some(StreamEncoder::encode(&note))
            }
            Some(ChannelItem::EndOfStream(Termination::Completed)) => {
                self.guard.state = SessionState::Completed;
                None
            }
            Some(ChannelItem::EndOfStream(Termination::Failed(reason))) => {
                self.guard.state = SessionState::Failed;
                let error = Error::WorkerFailure { reason };
                match self.failure_policy {
                    FailurePolicy::Silent => None,
                    FailurePolicy::ErrorRecord => Some(StreamEncoder::encode_error(&error)),
                }
            }
        }
    }
}

/// Releases everything a session holds. Runs exactly once, when the response
/// body is dropped.
struct SessionGuard {
    client: ClientId,
    signal: CancellationSignal,
    registry: Arc<CancellationRegistry>,
    inflight: Arc<AtomicUsize>,
    started: Instant,
    state: SessionState,
    notes: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // A body dropped mid-stream never reaches a terminal state on its own.
        if !self.state.is_terminal() {
            self.state = SessionState::Cancelled;
        }
        if self.state != SessionState::Completed {
            self.signal.set();
        }
        if self.state == SessionState::Cancelled {
            increment_sessions_cancelled();
        }

        let _released = self.registry.release(&self.client, &self.signal);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_sessions_inflight();

        let elapsed = self.started.elapsed();
        record_session_duration(elapsed.as_secs_f64() * 1000.0);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Session for client {} ended {:?} after {} notes in {:?} (released: {})",
            self.client,
            self.state,
            self.notes,
            elapsed,
            _released
        );
    }
}
