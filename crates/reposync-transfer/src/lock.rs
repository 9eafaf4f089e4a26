//! Exclusive, non-blocking transfer lock per target.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::TransferError;
use crate::progress::TransferId;

#[derive(Debug, Clone)]
struct LockEntry {
    holder: TransferId,
    refreshed: Instant,
}

/// Named locks held by transfers. A lock not refreshed within the timeout
/// may be taken over by another transfer.
pub struct TransferLock {
    timeout: Duration,
    locks: DashMap<String, LockEntry>,
}

impl TransferLock {
    /// Creates a lock table with the given takeover timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            locks: DashMap::new(),
        }
    }

    /// Takes the lock, failing immediately when another transfer holds it
    /// and has not timed out.
    pub fn acquire(&self, name: &str, transfer_id: &TransferId) -> Result<(), TransferError> {
        match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.holder != *transfer_id && entry.refreshed.elapsed() < self.timeout {
                    return Err(TransferError::LockHeld {
                        lock: name.to_string(),
                        holder: entry.holder.clone(),
                    });
                }
                if entry.holder != *transfer_id {
                    warn!(lock = name, old = %entry.holder, new = %transfer_id, "expired transfer lock taken over");
                }
                entry.holder = transfer_id.clone();
                entry.refreshed = Instant::now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    holder: transfer_id.clone(),
                    refreshed: Instant::now(),
                });
            }
        }
        info!(lock = name, transfer_id = %transfer_id, "transfer lock acquired");
        Ok(())
    }

    /// Extends the lock; fails when the transfer no longer holds it.
    pub fn refresh(&self, name: &str, transfer_id: &TransferId) -> Result<(), TransferError> {
        match self.locks.get_mut(name) {
            Some(mut entry) if entry.holder == *transfer_id => {
                entry.refreshed = Instant::now();
                Ok(())
            }
            _ => Err(TransferError::LockLost(transfer_id.clone())),
        }
    }

    /// Releases the lock if the transfer holds it. Returns true if released.
    pub fn release(&self, name: &str, transfer_id: &TransferId) -> bool {
        let released = self
            .locks
            .remove_if(name, |_, entry| entry.holder == *transfer_id)
            .is_some();
        if released {
            info!(lock = name, transfer_id = %transfer_id, "transfer lock released");
        }
        released
    }

    /// Current holder of the lock.
    pub fn holder(&self, name: &str) -> Option<TransferId> {
        self.locks.get(name).map(|entry| entry.holder.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_immediately() {
        let lock = TransferLock::new(Duration::from_secs(300));
        let one = TransferId::from("one");
        let two = TransferId::from("two");
        lock.acquire("target", &one).unwrap();
        let err = lock.acquire("target", &two).unwrap_err();
        assert!(matches!(err, TransferError::LockHeld { .. }));
        assert_eq!(lock.holder("target"), Some(one.clone()));
        lock.acquire("target", &one).unwrap();
    }

    #[test]
    fn test_release_then_acquire() {
        let lock = TransferLock::new(Duration::from_secs(300));
        let one = TransferId::from("one");
        let two = TransferId::from("two");
        lock.acquire("target", &one).unwrap();
        assert!(!lock.release("target", &two));
        assert!(lock.release("target", &one));
        lock.acquire("target", &two).unwrap();
        assert!(lock.refresh("target", &one).is_err());
    }

    #[test]
    fn test_expired_lock_is_taken_over() {
        let lock = TransferLock::new(Duration::ZERO);
        let one = TransferId::from("one");
        let two = TransferId::from("two");
        lock.acquire("target", &one).unwrap();
        lock.acquire("target", &two).unwrap();
        let err = lock.refresh("target", &one).unwrap_err();
        assert!(matches!(err, TransferError::LockLost(_)));
        lock.refresh("target", &two).unwrap();
    }

    #[test]
    fn test_independent_targets() {
        let lock = TransferLock::new(Duration::from_secs(300));
        lock.acquire("a", &TransferId::from("one")).unwrap();
        lock.acquire("b", &TransferId::from("two")).unwrap();
    }
}
