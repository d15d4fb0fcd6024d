//! Traffic-based admission for gated variants.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::variant::{Admission, TeaVariant};
use super::window::{ClientId, WindowTally, WindowedCounterStore};

/// Which count a gated variant is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdmissionScope {
    /// The caller's own requests for the variant in the current window.
    #[default]
    PerClient,
    /// All clients' requests for the variant in the current window.
    Aggregate,
}

impl AdmissionScope {
    fn select(&self, tally: &WindowTally) -> u64 {
        match self {
            AdmissionScope::PerClient => tally.count,
            AdmissionScope::Aggregate => tally.variant_total,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The variant is not gated; no traffic was recorded.
    Open,
    /// The variant is gated; `count` includes the request being checked.
    Counted { count: u64, threshold: u64 },
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        match self {
            AdmissionDecision::Open => true,
            AdmissionDecision::Counted { count, threshold } => count >= threshold,
        }
    }
}

/// Decides whether recent traffic justifies brewing a gated variant.
#[derive(Debug)]
pub struct AdmissionGate {
    store: Arc<WindowedCounterStore>,
    scope: AdmissionScope,
}

impl AdmissionGate {
    pub fn new(store: Arc<WindowedCounterStore>, scope: AdmissionScope) -> Self {
        Self { store, scope }
    }

    /// Check admission for one request.
    ///
    /// For gated variants this records the request as traffic before
    /// comparing, so it must be called at most once per request.
    pub fn admits(&self, variant: &TeaVariant, client: &ClientId) -> AdmissionDecision {
        let threshold = match variant.admission() {
            Admission::Open => return AdmissionDecision::Open,
            Admission::Gated { threshold } => threshold,
        };

        let tally = self.store.increment_and_get(client, variant.id());
        let count = self.scope.select(&tally);
        let decision = AdmissionDecision::Counted { count, threshold };

        debug!(
            variant = %variant,
            client = %client,
            count = count,
            threshold = threshold,
            admitted = decision.is_admitted(),
            "Admission checked"
        );

        decision
    }

    /// Scoped count for the current window, without recording traffic.
    pub fn count(&self, variant: &TeaVariant, client: &ClientId) -> u64 {
        let tally = self.store.peek(client, variant.id());
        self.scope.select(&tally)
    }

    pub fn scope(&self) -> AdmissionScope {
        self.scope
    }

    pub fn store(&self) -> &Arc<WindowedCounterStore> {
        &self.store
    }
}
