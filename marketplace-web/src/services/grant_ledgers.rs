use marketplace_client::GrantLedger;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_sessions::session::Id;
use tower_sessions::Session;

/// One [`GrantLedger`] per cookie session, so the controllers built for
/// concurrent or repeated loads of a callback agree on what was exchanged.
///
/// Entries idle for longer than the session itself are dropped.
pub struct SessionGrantLedgers {
    idle: Duration,
    ledgers: Mutex<HashMap<Id, (Arc<GrantLedger>, Instant)>>,
}

impl SessionGrantLedgers {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Ledger for the caller's session. A visitor without a session cookie
    /// gets a ledger of their own, since no other request can share it.
    pub fn for_session(&self, session: &Session) -> Arc<GrantLedger> {
        let Some(id) = session.id() else {
            return Arc::default();
        };

        let now = Instant::now();
        let mut ledgers = self
            .ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ledgers.retain(|_, (ledger, seen)| {
            ledger.in_flight() || now.duration_since(*seen) < self.idle
        });
        let (ledger, seen) = ledgers
            .entry(id)
            .or_insert_with(|| (Arc::default(), now));
        *seen = now;
        ledger.clone()
    }

    pub fn len(&self) -> usize {
        self.ledgers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_sessions::MemoryStore;

    fn session(id: Option<Id>) -> Session {
        Session::new(id, Arc::new(MemoryStore::default()), None)
    }

    #[test]
    fn same_session_shares_a_ledger() {
        let ledgers = SessionGrantLedgers::new(Duration::from_secs(60));
        let id = Id::default();

        let first = ledgers.for_session(&session(Some(id)));
        let second = ledgers.for_session(&session(Some(id)));
        let other = ledgers.for_session(&session(Some(Id::default())));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(ledgers.len(), 2);
    }

    #[test]
    fn cookieless_requests_are_not_tracked() {
        let ledgers = SessionGrantLedgers::new(Duration::from_secs(60));

        let first = ledgers.for_session(&session(None));
        let second = ledgers.for_session(&session(None));

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(ledgers.is_empty());
    }

    #[test]
    fn idle_ledgers_are_dropped() {
        let ledgers = SessionGrantLedgers::new(Duration::ZERO);

        ledgers.for_session(&session(Some(Id::default())));
        ledgers.for_session(&session(Some(Id::default())));

        assert_eq!(ledgers.len(), 1);
    }
}
