//! Configuration management for the teapot service.

use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::brewing::{AdmissionScope, PotScope};
use crate::error::{Result, TeapotError};

/// Environment variable prefix for layered configuration.
const ENV_PREFIX: &str = "TEAPOT";
/// Legacy environment override for the admission threshold.
const LEGACY_THRESHOLD_VAR: &str = "MIN_REQUEST_COUNT";

/// Main configuration for the teapot service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeapotConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Pot and admission configuration
    #[serde(default)]
    pub pot: PotConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTCPCP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Runtime worker threads (defaults to the number of cores)
    #[serde(default)]
    pub worker_num: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            worker_num: None,
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Pot configuration: the menu and how brewing is admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotConfig {
    /// Tea variants, in the order they are advertised
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantConfig>,

    /// Minimum requests per one-second window before a gated variant brews
    #[serde(default = "default_min_requests_count")]
    pub min_requests_count: u64,

    /// Whether pots are shared or kept per client
    #[serde(default)]
    pub pot_scope: PotScope,

    /// Whether admission counts are per client or across clients
    #[serde(default)]
    pub admission_scope: AdmissionScope,
}

impl Default for PotConfig {
    fn default() -> Self {
        Self {
            variants: default_variants(),
            min_requests_count: default_min_requests_count(),
            pot_scope: PotScope::default(),
            admission_scope: AdmissionScope::default(),
        }
    }
}

fn default_variants() -> Vec<VariantConfig> {
    vec![
        VariantConfig::open("english-breakfast"),
        VariantConfig::gated("earl-grey"),
    ]
}

fn default_min_requests_count() -> u64 {
    20
}

/// A single tea variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Name, also the path segment clients brew it under
    pub name: String,

    /// Whether brewing requires enough recent traffic
    #[serde(default)]
    pub gated: bool,

    /// Threshold override for this variant
    #[serde(default)]
    pub min_requests_count: Option<u64>,
}

impl VariantConfig {
    pub fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gated: false,
            min_requests_count: None,
        }
    }

    pub fn gated(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gated: true,
            min_requests_count: None,
        }
    }
}

impl TeapotConfig {
    /// Load configuration from an optional YAML file, then the environment.
    ///
    /// Environment keys use the `TEAPOT_` prefix with `__` between sections,
    /// e.g. `TEAPOT_POT__MIN_REQUESTS_COUNT=5`. `MIN_REQUEST_COUNT` is also
    /// accepted for the threshold and wins over everything else.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let legacy_threshold = std::env::var(LEGACY_THRESHOLD_VAR).ok();

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("pot.min_requests_count", legacy_threshold)
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize::<TeapotConfig>())
            .map_err(|e| TeapotError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TeapotError::Config(format!("Failed to parse configuration: {}", e)))
    }
}
