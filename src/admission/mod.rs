//! Admission gate: decides from the originating address whether a message
//! may be relayed at all. Consulted before any socket is opened.

mod error;
mod rules;

pub use error::AdmissionError;
pub use rules::{ALLOW_ALL, SenderRules};

use std::sync::{Arc, PoisonError, RwLock};

/// Process-wide handle on the current [`SenderRules`].
///
/// Readers take a snapshot; [`SenderGate::replace`] swaps the whole rule set,
/// so a concurrent reader sees either the old or the new rules.
#[derive(Debug, Default)]
pub struct SenderGate {
    rules: RwLock<Arc<SenderRules>>,
}

impl SenderGate {
    pub fn new(rules: SenderRules) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    pub fn allow_all() -> Self {
        Self::new(SenderRules::AllowAll)
    }

    pub fn rules(&self) -> Arc<SenderRules> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, rules: SenderRules) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(rules);
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.rules().is_blocked(ip)
    }
}
