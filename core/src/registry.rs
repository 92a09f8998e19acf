//! Observable collection of requests whose responses are not consumed yet.
//!
//! # Design
//! The facade adds a request right before executing it; the response removes
//! it when its body is consumed (or when execution fails). Both calls may come
//! from any thread. Listeners run after the internal lock is released, so a
//! listener may read the registry or hand the event to a UI thread without
//! deadlocking.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::http::RequestInfo;

/// A change to the registry, delivered with the size after the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(RequestInfo),
    Removed(RequestInfo),
}

pub type RegistryListener = Arc<dyn Fn(&RegistryEvent, usize) + Send + Sync>;

/// How a progress indicator should present the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Hidden,
    Indeterminate,
    /// `1/n` for `n` requests in flight.
    Fraction(f64),
}

impl Progress {
    pub fn for_count(in_flight: usize) -> Self {
        match in_flight {
            0 => Progress::Hidden,
            1 => Progress::Indeterminate,
            n => Progress::Fraction(1.0 / n as f64),
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: Mutex<Vec<RequestInfo>>,
    listeners: RwLock<Vec<RegistryListener>>,
}

/// Shared handle to an in-flight registry. Clones observe the same entries.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Inner>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `request` unless a request with the same sequence number is
    /// already present.
    pub fn add(&self, request: RequestInfo) -> bool {
        let size = {
            let mut entries = self.inner.entries.lock();
            if entries.iter().any(|r| r.seq == request.seq) {
                return false;
            }
            entries.push(request.clone());
            entries.len()
        };
        trace!(seq = request.seq, in_flight = size, "request added to registry");
        self.notify(&RegistryEvent::Added(request), size);
        true
    }

    /// Remove the request with sequence number `seq`. Removing an absent
    /// request is a no-op and notifies nobody.
    pub fn remove(&self, seq: u64) -> bool {
        let (removed, size) = {
            let mut entries = self.inner.entries.lock();
            let Some(index) = entries.iter().position(|r| r.seq == seq) else {
                return false;
            };
            let removed = entries.remove(index);
            (removed, entries.len())
        };
        trace!(seq, in_flight = size, "request removed from registry");
        self.notify(&RegistryEvent::Removed(removed), size);
        true
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.inner.entries.lock().iter().any(|r| r.seq == seq)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in dispatch order.
    pub fn snapshot(&self) -> Vec<RequestInfo> {
        self.inner.entries.lock().clone()
    }

    pub fn progress(&self) -> Progress {
        Progress::for_count(self.len())
    }

    /// One `METHOD uri` line per request in flight.
    pub fn describe(&self) -> String {
        self.snapshot()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&RegistryEvent, usize) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    pub(crate) fn ticket(&self, seq: u64) -> InFlightTicket {
        InFlightTicket {
            registry: self.clone(),
            seq,
        }
    }

    fn notify(&self, event: &RegistryEvent, size: usize) {
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener(event, size);
        }
    }
}

impl fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("entries", &self.snapshot())
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

/// The right to remove one request from a registry, spent at most once.
#[derive(Debug)]
pub(crate) struct InFlightTicket {
    registry: InFlightRegistry,
    seq: u64,
}

impl InFlightTicket {
    pub(crate) fn release(self) -> bool {
        self.registry.remove(self.seq)
    }
}
