//! Brewing core: traffic windows, admission, and pot state.

mod clock;
mod gate;
mod pot;
mod variant;
mod window;

pub use clock::{Clock, SystemClock};
pub use gate::{AdmissionDecision, AdmissionGate, AdmissionScope};
pub use pot::{BrewError, PotKey, PotScope, PotState, PotStatus, Teapot};
pub use variant::{Admission, TeaMenu, TeaVariant, VariantId};
pub use window::{ClientId, CounterKey, Window, WindowTally, WindowedCounterStore};

#[cfg(test)]
pub(crate) use clock::ManualClock;
