//! Unhandled promise rejection tracking
//!
//! A promise rejected with no reaction attached is remembered until the loop
//! goes idle. If nothing has handled it by then, it is reported once with a
//! warning. Attaching a handler afterwards logs a "handled late" event.

use crate::promise::Promise;
use crate::value::Value;
use rustc_hash::FxHashSet as HashSet;
use tracing::{debug, warn};

/// A rejection that was still unhandled when the loop went idle
#[derive(Debug, Clone)]
pub struct UnhandledRejection {
    pub promise: Promise,
    pub reason: Value,
}

#[derive(Debug, Default)]
pub(crate) struct RejectionTracker {
    /// Rejected without a handler since the last flush
    about_to_be_notified: Vec<Promise>,
    /// Ids of promises already reported
    outstanding: HashSet<u64>,
    /// Reports not yet taken by the host
    reported: Vec<UnhandledRejection>,
}

impl RejectionTracker {
    pub(crate) fn on_reject(&mut self, promise: &Promise) {
        self.about_to_be_notified.push(promise.clone());
    }

    pub(crate) fn on_handle(&mut self, promise: &Promise) {
        if let Some(index) = self
            .about_to_be_notified
            .iter()
            .position(|p| p.ptr_eq(promise))
        {
            self.about_to_be_notified.swap_remove(index);
            return;
        }
        if self.outstanding.remove(&promise.id()) {
            debug!(promise = promise.id(), "rejection handled late");
        }
    }

    /// Report every pending rejection that is still unhandled. Returns how
    /// many were reported.
    pub(crate) fn flush(&mut self) -> usize {
        let mut count = 0;
        for promise in std::mem::take(&mut self.about_to_be_notified) {
            if promise.is_handled() {
                continue;
            }
            let reason = promise.result().unwrap_or(Value::Undefined);
            warn!(promise = promise.id(), reason = %reason, "unhandled promise rejection");
            self.outstanding.insert(promise.id());
            self.reported.push(UnhandledRejection { promise, reason });
            count += 1;
        }
        count
    }

    pub(crate) fn take_reported(&mut self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.reported)
    }

    pub(crate) fn clear(&mut self) {
        self.about_to_be_notified.clear();
        self.outstanding.clear();
        self.reported.clear();
    }
}
