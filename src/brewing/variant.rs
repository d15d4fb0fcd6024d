//! The fixed menu of tea variants a pot can brew.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::PotConfig;
use crate::error::{Result, TeapotError};

/// Dense identifier of a variant, assigned in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(u16);

impl VariantId {
    /// Position of the variant in the menu.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: u16) -> Self {
        Self(index)
    }
}

/// Admission policy of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Brews whenever the pot is idle.
    Open,
    /// Brews only once the current window has seen `threshold` requests.
    Gated { threshold: u64 },
}

impl Admission {
    pub fn is_gated(&self) -> bool {
        matches!(self, Admission::Gated { .. })
    }

    pub fn threshold(&self) -> Option<u64> {
        match self {
            Admission::Open => None,
            Admission::Gated { threshold } => Some(*threshold),
        }
    }
}

/// A variant on the menu.
#[derive(Debug, Clone)]
pub struct TeaVariant {
    id: VariantId,
    name: Arc<str>,
    admission: Admission,
}

impl TeaVariant {
    pub fn id(&self) -> VariantId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }
}

impl fmt::Display for TeaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The validated set of variants, immutable once built.
#[derive(Debug, Clone)]
pub struct TeaMenu {
    variants: Vec<TeaVariant>,
    by_name: HashMap<Arc<str>, VariantId>,
}

impl TeaMenu {
    /// Build the menu from configuration.
    ///
    /// Fails when the menu is empty, a name is not a single path segment,
    /// or a name appears twice.
    pub fn from_config(config: &PotConfig) -> Result<Self> {
        if config.variants.is_empty() {
            return Err(TeapotError::Config(
                "at least one tea variant must be configured".to_string(),
            ));
        }
        if config.variants.len() > u16::MAX as usize {
            return Err(TeapotError::Config(format!(
                "too many tea variants: {}",
                config.variants.len()
            )));
        }

        let mut variants = Vec::with_capacity(config.variants.len());
        let mut by_name = HashMap::with_capacity(config.variants.len());

        for (index, variant) in config.variants.iter().enumerate() {
            validate_name(&variant.name)?;

            let id = VariantId(index as u16);
            let name: Arc<str> = Arc::from(variant.name.as_str());
            let admission = if variant.gated {
                Admission::Gated {
                    threshold: variant
                        .min_requests_count
                        .unwrap_or(config.min_requests_count),
                }
            } else {
                Admission::Open
            };

            if by_name.insert(name.clone(), id).is_some() {
                return Err(TeapotError::Config(format!(
                    "duplicate tea variant \"{}\"",
                    name
                )));
            }

            info!(variant = %name, admission = ?admission, "Registered tea variant");
            variants.push(TeaVariant {
                id,
                name,
                admission,
            });
        }

        Ok(Self { variants, by_name })
    }

    /// Look up a variant by name.
    pub fn get(&self, name: &str) -> Option<&TeaVariant> {
        self.by_name.get(name).map(|id| &self.variants[id.index()])
    }

    /// Look up a variant by id.
    pub fn variant(&self, id: VariantId) -> Option<&TeaVariant> {
        self.variants.get(id.index())
    }

    /// Variants in menu order.
    pub fn iter(&self) -> impl Iterator<Item = &TeaVariant> {
        self.variants.iter()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(TeapotError::Config(format!(
            "invalid tea variant name \"{}\": use ASCII letters, digits, '-' or '_'",
            name
        )))
    }
}
