use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::models::PendingGrant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Grant bookkeeping for one browser session.
///
/// A server-rendered host builds a controller per request; handing each of
/// them the session's ledger keeps at most one exchange in flight and stops
/// a reloaded callback from exchanging the same grant twice.
#[derive(Debug, Default)]
pub struct GrantLedger {
    in_flight: AtomicBool,
    /// Last grant exchanged, so a replayed URL is not exchanged again.
    consumed: Mutex<Option<PendingGrant>>,
}

impl GrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the session's single exchange slot.
    pub(crate) fn begin(&self) -> Option<GrantGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GrantGuard {
                flag: &self.in_flight,
            })
    }

    pub fn is_consumed(&self, grant: &PendingGrant) -> bool {
        lock(&self.consumed).as_ref() == Some(grant)
    }

    pub(crate) fn mark_consumed(&self, grant: PendingGrant) {
        *lock(&self.consumed) = Some(grant);
    }

    pub(crate) fn forget(&self) {
        *lock(&self.consumed) = None;
    }
}

/// Holds the in-flight flag until dropped.
pub(crate) struct GrantGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GrantGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(code: &str) -> PendingGrant {
        PendingGrant::Code {
            code: code.to_string(),
        }
    }

    #[test]
    fn only_one_exchange_slot() {
        let ledger = GrantLedger::new();

        let guard = ledger.begin().expect("slot is free");
        assert!(ledger.in_flight());
        assert!(ledger.begin().is_none());

        drop(guard);
        assert!(!ledger.in_flight());
        assert!(ledger.begin().is_some());
    }

    #[test]
    fn remembers_the_last_grant_until_forgotten() {
        let ledger = GrantLedger::new();
        ledger.mark_consumed(code("abc"));

        assert!(ledger.is_consumed(&code("abc")));
        assert!(!ledger.is_consumed(&code("def")));

        ledger.forget();
        assert!(!ledger.is_consumed(&code("abc")));
    }
}
