//! Application configuration loading and merging.
//!
//! Combines CLI arguments, environment variables, and TOML file configuration
//! into a unified [`AppConfig`] structure.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::{Cli, MigrationOptions, StorageOptions};
use crate::migrations::GeneratorOptions;

use super::overlay::Overlay;
use super::storage::StorageSettings;

const CONFIG_FILE_NAME: &str = "consensus-indexer.toml";
const LEGACY_CONFIG_FILES: [&str; 2] = [
    "consensus-indexer.toml",
    "config/consensus-indexer.toml",
];
const PROJECT_QUALIFIER: &str = "org";
const PROJECT_ORGANIZATION: &str = "consensus-indexer";
const PROJECT_APPLICATION: &str = "consensus-indexer";

/// Fully materialized configuration for the application.
#[derive(Debug)]
pub struct AppConfig {
    /// Path to the loaded configuration file, if any.
    pub config_file: Option<PathBuf>,
    /// Root directory for application data.
    pub data_dir: PathBuf,
    /// Log destination; stderr when absent.
    pub log_file: Option<PathBuf>,
    pub storage: StorageSettings,
    pub migration: GeneratorOptions,
}

impl AppConfig {
    /// Loads and merges configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML configuration file
    /// 4. Built-in defaults
    pub fn load(cli: Cli) -> Result<Self> {
        let Cli {
            config,
            data_dir: cli_data_dir,
            log_file: cli_log_file,
            storage: cli_storage,
            migration: cli_migration,
            ..
        } = cli;

        let (file_config, config_path) = load_file_config(config.as_ref())?;
        let FileConfig {
            data_dir: file_data_dir,
            log_file: file_log_file,
            storage: file_storage,
            migration: file_migration,
        } = file_config;

        let data_dir = cli_data_dir
            .or(file_data_dir)
            .or_else(default_data_dir_path)
            .ok_or_else(|| {
                anyhow!(
                    "data_dir is required (set --data-dir, CONSENSUS_INDEXER_DATA_DIR, or ensure the OS user data directory is available)"
                )
            })?;

        let storage = file_storage
            .unwrap_or_default()
            .overlay(cli_storage)
            .build(&data_dir)?;
        let migration = file_migration
            .unwrap_or_default()
            .overlay(cli_migration)
            .build()?;

        Ok(Self {
            config_file: config_path,
            data_dir,
            log_file: cli_log_file.or(file_log_file),
            storage,
            migration,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    storage: Option<StorageOptions>,
    #[serde(default)]
    migration: Option<MigrationOptions>,
}

fn load_file_config(path: Option<&PathBuf>) -> Result<(FileConfig, Option<PathBuf>)> {
    if let Some(provided) = path {
        let config = read_toml(provided)?;
        return Ok((config, Some(provided.clone())));
    }

    if let Some(default_path) = default_config_file_path().filter(|path| path.exists()) {
        let config = read_toml(&default_path)?;
        return Ok((config, Some(default_path)));
    }

    for candidate in LEGACY_CONFIG_FILES {
        let candidate_path = Path::new(candidate);
        if candidate_path.exists() {
            let config = read_toml(candidate_path)?;
            return Ok((config, Some(candidate_path.to_path_buf())));
        }
    }

    Ok((FileConfig::default(), None))
}

fn read_toml(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn default_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(PROJECT_QUALIFIER, PROJECT_ORGANIZATION, PROJECT_APPLICATION)
}

fn default_config_file_path() -> Option<PathBuf> {
    default_project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn default_data_dir_path() -> Option<PathBuf> {
    default_project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}
