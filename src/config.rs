//! Runtime settings.
//!
//! Defaults are overridden by an optional settings file (`claimsql.toml`,
//! `claimsql.json`, or any other format the `config` crate understands) and
//! then by `CLAIMSQL_` environment variables, with `__` separating sections:
//! `CLAIMSQL_CORRECTION__MAX_RETRIES=5`, `CLAIMSQL_EXECUTION__MAX_ROWS=100`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::correction::DEFAULT_MAX_RETRIES;
use crate::error::Result;
use crate::interface::default_workers;
use crate::validate::TypeStrictness;

pub const DEFAULT_SETTINGS_FILE: &str = "claimsql";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Corrections allowed after the first candidate.
    pub max_retries: u32,
    pub type_strictness: TypeStrictness,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            type_strictness: TypeStrictness::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub max_rows: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub load_sample_data: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("claims.db"),
            load_sample_data: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSettings {
    /// JSON schema definition; the built-in claims schema when absent.
    pub definition: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub correction: CorrectionSettings,
    pub execution: ExecutionSettings,
    pub store: StoreSettings,
    pub schema: SchemaSettings,
    pub server: ServerSettings,
    pub workers: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            correction: CorrectionSettings::default(),
            execution: ExecutionSettings::default(),
            store: StoreSettings::default(),
            schema: SchemaSettings::default(),
            server: ServerSettings::default(),
            workers: default_workers(),
            log_level: "info".into(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (or `claimsql.*` in the working directory,
    /// if present) and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("CLAIMSQL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
