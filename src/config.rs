//! Database and output configuration
//!
//! Looked up from `--config`, then `SUBIR_CONFIG`, then `./subir.json`. Without
//! any file a single local database is used.

use crate::error::{Result, SubirError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SUBIR_CONFIG";

/// Environment variable overriding the selected database's path
pub const DATABASE_PATH_ENV: &str = "SUBIR_DATABASE_PATH";

/// Configuration file looked for in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "subir.json";

pub const DEFAULT_DATABASE: &str = "stage_01";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// DuckDB file, or `:memory:`
    pub path: String,
    /// Groups granted read access to tables created by `create`
    #[serde(default)]
    pub read_only_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubirConfig {
    #[serde(default = "default_database_name")]
    pub default_database: String,
    /// Where generated SQL and conflict reports are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub databases: IndexMap<String, DatabaseConfig>,
}

fn default_database_name() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for SubirConfig {
    fn default() -> Self {
        let mut databases = IndexMap::new();
        databases.insert(
            DEFAULT_DATABASE.to_string(),
            DatabaseConfig {
                path: "subir.duckdb".to_string(),
                read_only_groups: Vec::new(),
            },
        );
        Self {
            default_database: default_database_name(),
            output_dir: default_output_dir(),
            databases,
        }
    }
}

impl SubirConfig {
    /// Load the first configuration found, falling back to the default.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SubirError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: SubirConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            return Err(SubirError::config("No databases configured"));
        }
        for (name, database) in &self.databases {
            if database.path.trim().is_empty() {
                return Err(SubirError::config(format!(
                    "Database '{}' has an empty path",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Settings of the named database, or of the default one. The path honours
    /// `SUBIR_DATABASE_PATH`.
    pub fn database(&self, name: Option<&str>) -> Result<DatabaseConfig> {
        let name = name.unwrap_or(&self.default_database);
        let mut database = self.databases.get(name).cloned().ok_or_else(|| {
            SubirError::config(format!(
                "Unknown database '{}'. Available: {}",
                name,
                self.databases
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        if let Ok(path) = std::env::var(DATABASE_PATH_ENV) {
            if !path.is_empty() {
                log::debug!("Using database path from {}: {}", DATABASE_PATH_ENV, path);
                database.path = path;
            }
        }
        Ok(database)
    }
}
