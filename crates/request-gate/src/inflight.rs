//! In-flight table: one live cancellation handle per fingerprint.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

/// Why a tracked request was aborted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// A newer request with the same fingerprint replaced this one.
    Superseded,
    /// The server invalidated the session; every pending call is dropped.
    SessionExpired,
    /// The owning context is shutting down (logout, process exit).
    Shutdown,
    Manual(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Superseded => f.write_str("superseded by an identical request"),
            CancelReason::SessionExpired => f.write_str("session expired"),
            CancelReason::Shutdown => f.write_str("session closed"),
            CancelReason::Manual(reason) => f.write_str(reason),
        }
    }
}

/// Cancellation handle attached to one dispatched request.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    id: Uuid,
    token: CancellationToken,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token the transport observes at its I/O boundaries.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Aborts the request. The first reason recorded wins; returns false if the handle was
    /// already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Fingerprint → live handle. Entries appear at dispatch and disappear at settlement or on
/// bulk cancellation.
#[derive(Debug, Default)]
pub struct InFlightTable {
    entries: DashMap<Fingerprint, CancelHandle>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh handle for `fingerprint`, superseding any live one.
    pub fn begin(&self, fingerprint: Fingerprint) -> CancelHandle {
        let handle = CancelHandle::new();
        let replaced = match self.entries.entry(fingerprint.clone()) {
            Entry::Occupied(mut occupied) => Some(occupied.insert(handle.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(handle.clone());
                None
            }
        };

        if let Some(previous) = replaced {
            previous.cancel(CancelReason::Superseded);
            info!(
                target: "request-gate",
                fingerprint = %fingerprint,
                superseded = %previous.id(),
                "cancelled in-flight duplicate"
            );
        }
        debug!(target: "request-gate", fingerprint = %fingerprint, id = %handle.id(), "dispatch");
        handle
    }

    /// Drops the entry for `fingerprint` only while it still belongs to `handle`. A stale
    /// request settling after its replacement was dispatched leaves the newer entry alone.
    pub fn settle(&self, fingerprint: &Fingerprint, handle: &CancelHandle) -> bool {
        let removed = self
            .entries
            .remove_if(fingerprint, |_, current| current.id() == handle.id())
            .is_some();
        debug!(
            target: "request-gate",
            fingerprint = %fingerprint,
            id = %handle.id(),
            removed,
            "settle"
        );
        removed
    }

    /// Like [`begin`](Self::begin), but the returned guard settles the entry when dropped.
    /// A guard dropped before [`InFlightGuard::finish`] also cancels its handle, so an
    /// abandoned caller never leaves an entry behind.
    pub fn track(&self, fingerprint: Fingerprint) -> InFlightGuard<'_> {
        let handle = self.begin(fingerprint.clone());
        InFlightGuard {
            table: self,
            fingerprint,
            handle,
            finished: false,
        }
    }

    /// Cancels every tracked handle and empties the table.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let mut cancelled = 0usize;
        self.entries.retain(|_, handle| {
            handle.cancel(reason.clone());
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            info!(target: "request-gate", cancelled, %reason, "cancelled all in-flight requests");
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn handle_for(&self, fingerprint: &Fingerprint) -> Option<CancelHandle> {
        self.entries.get(fingerprint).map(|entry| entry.value().clone())
    }
}

/// Table entry owned by one dispatch.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    table: &'a InFlightTable,
    fingerprint: Fingerprint,
    handle: CancelHandle,
    finished: bool,
}

impl InFlightGuard<'_> {
    pub fn handle(&self) -> &CancelHandle {
        &self.handle
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Marks the request as settled normally and releases the entry.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && self.handle.cancel(CancelReason::Manual("abandoned".to_string())) {
            debug!(
                target: "request-gate",
                fingerprint = %self.fingerprint,
                id = %self.handle.id(),
                "caller dropped in-flight request"
            );
        }
        self.table.settle(&self.fingerprint, &self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn fp(path: &str) -> Fingerprint {
        Fingerprint::compute(&Method::GET, path, None, None)
    }

    #[test]
    fn begin_supersedes_previous_entry() {
        let table = InFlightTable::new();
        let first = table.begin(fp("/a"));
        let second = table.begin(fp("/a"));

        assert!(first.is_cancelled());
        assert_eq!(first.reason(), Some(CancelReason::Superseded));
        assert!(!second.is_cancelled());
        assert_eq!(table.len(), 1);
        assert_eq!(table.handle_for(&fp("/a")).unwrap().id(), second.id());
    }

    #[test]
    fn stale_settle_keeps_newer_entry() {
        let table = InFlightTable::new();
        let first = table.begin(fp("/a"));
        let second = table.begin(fp("/a"));

        assert!(!table.settle(&fp("/a"), &first));
        assert!(table.contains(&fp("/a")));
        assert!(table.settle(&fp("/a"), &second));
        assert!(table.is_empty());
    }

    #[test]
    fn cancel_all_clears_and_marks_handles() {
        let table = InFlightTable::new();
        let handles = vec![table.begin(fp("/a")), table.begin(fp("/b")), table.begin(fp("/c"))];

        assert_eq!(table.cancel_all(CancelReason::SessionExpired), 3);
        assert!(table.is_empty());
        for handle in handles {
            assert!(handle.is_cancelled());
            assert_eq!(handle.reason(), Some(CancelReason::SessionExpired));
        }
    }

    #[test]
    fn dropped_guard_releases_and_cancels() {
        let table = InFlightTable::new();
        let guard = table.track(fp("/a"));
        let handle = guard.handle().clone();
        assert!(table.contains(&fp("/a")));

        drop(guard);
        assert!(table.is_empty());
        assert!(handle.is_cancelled());
        assert_eq!(handle.reason(), Some(CancelReason::Manual("abandoned".into())));
    }

    #[test]
    fn finished_guard_releases_without_cancelling() {
        let table = InFlightTable::new();
        let guard = table.track(fp("/a"));
        let handle = guard.handle().clone();
        guard.finish();
        assert!(table.is_empty());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn superseded_guard_leaves_newer_entry() {
        let table = InFlightTable::new();
        let stale = table.track(fp("/a"));
        let fresh = table.track(fp("/a"));
        drop(stale);
        assert_eq!(table.handle_for(&fp("/a")).map(|h| h.id()), Some(fresh.handle().id()));
        fresh.finish();
        assert!(table.is_empty());
    }

    #[test]
    fn first_reason_wins() {
        let table = InFlightTable::new();
        let handle = table.begin(fp("/a"));
        assert!(handle.cancel(CancelReason::Manual("user".into())));
        assert!(!handle.cancel(CancelReason::Shutdown));
        assert_eq!(handle.reason(), Some(CancelReason::Manual("user".into())));
    }
}
