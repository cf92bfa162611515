//! Per-client cancellation bookkeeping.
//!
//! At most one generation per client id is active at a time. Registering a new
//! session for a client that already has one sets the previous signal, which
//! stops the older worker and ends the older stream. Releasing is
//! identity-checked so a stale session can never unregister its replacement.

use notegen_core::types::ClientId;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

/// A one-way, thread-safe stop flag shared by a worker and its coordinator.
///
/// Once set it stays set. Cloning shares the same underlying flag; use
/// [`CancellationSignal::same_as`] to compare identity.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal(Arc<CancellationToken>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Idempotent.
    pub fn set(&self) {
        self.0.cancel();
    }

    pub fn is_set(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }

    /// Returns `true` if both handles refer to the same flag.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Maps each client to the signal of its current generation.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    active: Mutex<HashMap<ClientId, CancellationSignal>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh signal for `client` and returns it.
    ///
    /// Any previously registered signal for the same client is set and evicted
    /// inside the same critical section.
    pub fn register(&self, client: &ClientId) -> CancellationSignal {
        let signal = CancellationSignal::new();
        let mut active = self.active.lock();
        if let Some(previous) = active.insert(client.clone(), signal.clone()) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Preempting active generation for client {client}");
            previous.set();
        }
        signal
    }

    /// Removes the entry for `client` only if it is still `signal`.
    ///
    /// Returns `true` when an entry was removed. A session that has already
    /// been superseded gets `false` and leaves the newer entry untouched.
    pub fn release(&self, client: &ClientId, signal: &CancellationSignal) -> bool {
        let mut active = self.active.lock();
        match active.get(client) {
            Some(current) if current.same_as(signal) => {
                active.remove(client);
                true
            }
            _ => false,
        }
    }

    /// Sets and removes every registered signal. Used during shutdown.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.active.lock().drain().collect();
        let count = drained.len();
        for (_client, signal) in drained {
            signal.set();
        }
        count
    }

    /// The signal currently registered for `client`, if any.
    pub fn current(&self, client: &ClientId) -> Option<CancellationSignal> {
        self.active.lock().get(client).cloned()
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.active.lock().contains_key(client)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}
