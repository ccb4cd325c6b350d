//! Per-payment lifecycle state machine
//!
//! Transition graph:
//!
//! ```text
//! (absent)   -> INITIATED
//! INITIATED  -> PROCESSING | CANCELLED
//! PROCESSING -> SUCCESS | FAILED | CANCELLED
//! FAILED     -> PROCESSING
//! SUCCESS    -> (terminal)
//! CANCELLED  -> (terminal)
//! ```
//!
//! The store is process-local and keyed by payment id; transitions for a
//! single id are serialized by the per-key map entry.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// Charge accepted, dispatch not started
    Initiated,
    /// Dispatch in flight
    Processing,
    /// Cancelled by the caller
    Cancelled,
    /// Charged successfully
    Success,
    /// Terminally failed (may be retried explicitly)
    Failed,
}

impl PaymentState {
    /// Whether this state ends the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Success | PaymentState::Failed | PaymentState::Cancelled)
    }

    /// The wire string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Initiated => "INITIATED",
            PaymentState::Processing => "PROCESSING",
            PaymentState::Cancelled => "CANCELLED",
            PaymentState::Success => "SUCCESS",
            PaymentState::Failed => "FAILED",
        }
    }

    fn allows(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        match self {
            Initiated => matches!(next, Processing | Cancelled),
            Processing => matches!(next, Success | Failed | Cancelled),
            Failed => matches!(next, Processing),
            Cancelled | Success => false,
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not an edge of the lifecycle graph.
    #[error("invalid state change request: {from:?} -> {to}")]
    InvalidTransition {
        /// Current state (`None` when the payment has no state yet)
        from: Option<PaymentState>,
        /// Requested state
        to: PaymentState,
    },
}

/// Concurrent, process-local state store keyed by payment id.
#[derive(Debug, Default)]
pub struct StateStore {
    states: DashMap<String, PaymentState>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, if the payment has entered the lifecycle.
    pub fn get(&self, payment_id: &str) -> Option<PaymentState> {
        self.states.get(payment_id).map(|s| *s)
    }

    /// Apply one transition. The only legal entry from absence is INITIATED.
    pub fn transition(&self, payment_id: &str, to: PaymentState) -> Result<(), StateError> {
        use dashmap::mapref::entry::Entry;
        match self.states.entry(payment_id.to_string()) {
            Entry::Vacant(v) => {
                if to == PaymentState::Initiated {
                    v.insert(to);
                    Ok(())
                } else {
                    Err(StateError::InvalidTransition { from: None, to })
                }
            }
            Entry::Occupied(mut o) => {
                let current = *o.get();
                if current.allows(to) {
                    o.insert(to);
                    Ok(())
                } else {
                    Err(StateError::InvalidTransition { from: Some(current), to })
                }
            }
        }
    }

    /// Atomically move a payment into PROCESSING.
    ///
    /// Covers the three legal entries in one step: absent -> INITIATED ->
    /// PROCESSING, INITIATED -> PROCESSING, and FAILED -> PROCESSING. Either
    /// both hops commit or the prior state is left untouched.
    pub fn begin_processing(&self, payment_id: &str) -> Result<(), StateError> {
        use dashmap::mapref::entry::Entry;
        match self.states.entry(payment_id.to_string()) {
            Entry::Vacant(v) => {
                v.insert(PaymentState::Processing);
                Ok(())
            }
            Entry::Occupied(mut o) => {
                let current = *o.get();
                match current {
                    PaymentState::Initiated | PaymentState::Failed => {
                        o.insert(PaymentState::Processing);
                        Ok(())
                    }
                    _ => Err(StateError::InvalidTransition {
                        from: Some(current),
                        to: PaymentState::Processing,
                    }),
                }
            }
        }
    }

    /// Force a non-terminal payment to FAILED. Terminal states are untouched.
    pub fn force_fail(&self, payment_id: &str) -> PaymentState {
        use dashmap::mapref::entry::Entry;
        match self.states.entry(payment_id.to_string()) {
            Entry::Vacant(v) => {
                v.insert(PaymentState::Failed);
                PaymentState::Failed
            }
            Entry::Occupied(mut o) => {
                let current = *o.get();
                if current.is_terminal() {
                    current
                } else {
                    o.insert(PaymentState::Failed);
                    PaymentState::Failed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_only_via_initiated() {
        let store = StateStore::new();
        assert_eq!(
            store.transition("p1", PaymentState::Success),
            Err(StateError::InvalidTransition { from: None, to: PaymentState::Success })
        );
        assert!(store.transition("p1", PaymentState::Initiated).is_ok());
        assert_eq!(store.get("p1"), Some(PaymentState::Initiated));
    }

    #[test]
    fn happy_path_is_legal() {
        let store = StateStore::new();
        store.transition("p1", PaymentState::Initiated).unwrap();
        store.transition("p1", PaymentState::Processing).unwrap();
        store.transition("p1", PaymentState::Success).unwrap();
        assert!(store.get("p1").unwrap().is_terminal());
    }

    #[test]
    fn success_is_immutable() {
        let store = StateStore::new();
        store.transition("p1", PaymentState::Initiated).unwrap();
        store.transition("p1", PaymentState::Processing).unwrap();
        store.transition("p1", PaymentState::Success).unwrap();
        for next in [PaymentState::Processing, PaymentState::Failed, PaymentState::Cancelled] {
            assert!(store.transition("p1", next).is_err());
        }
    }

    #[test]
    fn failed_reenters_processing() {
        let store = StateStore::new();
        store.transition("p1", PaymentState::Initiated).unwrap();
        store.transition("p1", PaymentState::Processing).unwrap();
        store.transition("p1", PaymentState::Failed).unwrap();
        assert!(store.transition("p1", PaymentState::Processing).is_ok());
    }

    #[test]
    fn cancelled_is_terminal() {
        let store = StateStore::new();
        store.transition("p1", PaymentState::Initiated).unwrap();
        store.transition("p1", PaymentState::Cancelled).unwrap();
        assert!(store.transition("p1", PaymentState::Processing).is_err());
    }

    #[test]
    fn begin_processing_from_absent_and_failed() {
        let store = StateStore::new();
        store.begin_processing("p1").unwrap();
        assert_eq!(store.get("p1"), Some(PaymentState::Processing));

        store.transition("p1", PaymentState::Failed).unwrap();
        store.begin_processing("p1").unwrap();
        assert_eq!(store.get("p1"), Some(PaymentState::Processing));
    }

    #[test]
    fn begin_processing_rejects_inflight_and_success() {
        let store = StateStore::new();
        store.begin_processing("p1").unwrap();
        assert!(store.begin_processing("p1").is_err());

        store.transition("p1", PaymentState::Success).unwrap();
        assert!(store.begin_processing("p1").is_err());
    }

    #[test]
    fn force_fail_spares_terminal_states() {
        let store = StateStore::new();
        store.begin_processing("p1").unwrap();
        assert_eq!(store.force_fail("p1"), PaymentState::Failed);

        store.transition("p2", PaymentState::Initiated).unwrap();
        store.transition("p2", PaymentState::Processing).unwrap();
        store.transition("p2", PaymentState::Success).unwrap();
        assert_eq!(store.force_fail("p2"), PaymentState::Success);
    }
}
