//! Pot state machine: exclusive start/stop per resource key.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::gate::{AdmissionDecision, AdmissionGate};
use super::variant::{TeaMenu, TeaVariant, VariantId};
use super::window::{ClientId, WindowedCounterStore};
use crate::config::PotConfig;

/// State of a single pot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PotState {
    #[default]
    Idle,
    Brewing,
}

impl fmt::Display for PotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PotState::Idle => f.write_str("idle"),
            PotState::Brewing => f.write_str("brewing"),
        }
    }
}

/// How pot state is keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PotScope {
    /// One pot per variant, shared by every client.
    #[default]
    Shared,
    /// One pot per variant and client.
    PerClient,
}

/// Identity under which brewing state is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PotKey {
    pub variant: VariantId,
    pub client: Option<ClientId>,
}

impl PotScope {
    fn key(&self, variant: VariantId, client: &ClientId) -> PotKey {
        match self {
            PotScope::Shared => PotKey {
                variant,
                client: None,
            },
            PotScope::PerClient => PotKey {
                variant,
                client: Some(client.clone()),
            },
        }
    }
}

/// Rejected control requests. None of these leave the pot in a new state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrewError {
    #[error("\"{0}\" is not supported for this pot")]
    UnknownResource(String),

    #[error("\"{0}\" tea is already brewing")]
    Busy(String),

    #[error("\"{0}\" tea is not brewing")]
    NotBrewing(String),

    /// The request was still counted as traffic.
    #[error("Traffic too low to brew \"{variant}\" tea: {count}/{threshold}")]
    InsufficientTraffic {
        variant: String,
        count: u64,
        threshold: u64,
    },
}

/// Snapshot of one pot for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PotStatus {
    pub variant: String,
    pub state: PotState,
    pub gated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_count: Option<u64>,
}

/// The tea pot: menu, admission gate, and the state of every pot.
///
/// Shared across all request handlers behind an `Arc`. Each start or stop
/// runs its check-then-transition while holding the pot's map entry, so
/// concurrent requests on the same key serialize and exactly one wins.
pub struct Teapot {
    menu: TeaMenu,
    gate: AdmissionGate,
    scope: PotScope,
    pots: DashMap<PotKey, PotState>,
}

impl Teapot {
    /// Create a teapot driven by the system clock.
    pub fn new(config: &PotConfig) -> crate::error::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a teapot driven by the given clock.
    pub fn with_clock(config: &PotConfig, clock: Arc<dyn Clock>) -> crate::error::Result<Self> {
        let menu = TeaMenu::from_config(config)?;
        let store = Arc::new(WindowedCounterStore::with_clock(clock));
        let gate = AdmissionGate::new(store, config.admission_scope);

        let pots = DashMap::new();
        if config.pot_scope == PotScope::Shared {
            for variant in menu.iter() {
                pots.insert(
                    PotKey {
                        variant: variant.id(),
                        client: None,
                    },
                    PotState::Idle,
                );
            }
        }

        info!(
            variants = menu.len(),
            pot_scope = ?config.pot_scope,
            admission_scope = ?config.admission_scope,
            "Teapot ready"
        );

        Ok(Self {
            menu,
            gate,
            scope: config.pot_scope,
            pots,
        })
    }

    pub fn menu(&self) -> &TeaMenu {
        &self.menu
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Start brewing `variant` on behalf of `client`.
    pub fn start(&self, client: &ClientId, variant: &str) -> Result<PotState, BrewError> {
        let variant = self.lookup(variant)?;
        let mut pot = self
            .pots
            .entry(self.scope.key(variant.id(), client))
            .or_default();

        if *pot == PotState::Brewing {
            debug!(variant = %variant, client = %client, "Pot busy");
            return Err(BrewError::Busy(variant.name().to_string()));
        }

        if let AdmissionDecision::Counted { count, threshold } = self.gate.admits(variant, client) {
            if count < threshold {
                return Err(BrewError::InsufficientTraffic {
                    variant: variant.name().to_string(),
                    count,
                    threshold,
                });
            }
        }

        *pot = PotState::Brewing;
        info!(variant = %variant, client = %client, "Started brewing");
        Ok(PotState::Brewing)
    }

    /// Stop brewing `variant` on behalf of `client`.
    pub fn stop(&self, client: &ClientId, variant: &str) -> Result<PotState, BrewError> {
        let variant = self.lookup(variant)?;
        // A pot that was never created is idle; stopping it must not create it.
        let mut pot = match self.pots.get_mut(&self.scope.key(variant.id(), client)) {
            Some(pot) if *pot == PotState::Brewing => pot,
            _ => {
                debug!(variant = %variant, client = %client, "Pot not brewing");
                return Err(BrewError::NotBrewing(variant.name().to_string()));
            }
        };

        *pot = PotState::Idle;
        info!(variant = %variant, client = %client, "Stopped brewing");
        Ok(PotState::Idle)
    }

    /// Current state of the pot `client` would control for `variant`.
    pub fn state(&self, client: &ClientId, variant: &str) -> Result<PotState, BrewError> {
        let variant = self.lookup(variant)?;
        Ok(self.state_of(variant, client))
    }

    /// Admission count for `variant` in the current window, without
    /// recording traffic. Zero for open variants.
    pub fn admission_count(&self, client: &ClientId, variant: &str) -> Result<u64, BrewError> {
        let variant = self.lookup(variant)?;
        Ok(self.gate.count(variant, client))
    }

    /// Status of one pot as seen by `client`.
    pub fn status(&self, client: &ClientId, variant: &str) -> Result<PotStatus, BrewError> {
        let variant = self.lookup(variant)?;
        Ok(self.status_of(variant, client))
    }

    /// Status of every pot on the menu as seen by `client`.
    pub fn pots(&self, client: &ClientId) -> Vec<PotStatus> {
        self.menu
            .iter()
            .map(|variant| self.status_of(variant, client))
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&TeaVariant, BrewError> {
        self.menu
            .get(name)
            .ok_or_else(|| BrewError::UnknownResource(name.to_string()))
    }

    fn state_of(&self, variant: &TeaVariant, client: &ClientId) -> PotState {
        self.pots
            .get(&self.scope.key(variant.id(), client))
            .map(|pot| *pot)
            .unwrap_or_default()
    }

    fn status_of(&self, variant: &TeaVariant, client: &ClientId) -> PotStatus {
        let admission = variant.admission();
        PotStatus {
            variant: variant.name().to_string(),
            state: self.state_of(variant, client),
            gated: admission.is_gated(),
            threshold: admission.threshold(),
            admission_count: admission
                .is_gated()
                .then(|| self.gate.count(variant, client)),
        }
    }
}

impl fmt::Debug for Teapot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teapot")
            .field("menu", &self.menu)
            .field("scope", &self.scope)
            .field("pots", &self.pots.len())
            .finish()
    }
}
