//! # Application Configuration
//!
//! Layered application configuration backed by the `config` crate: defaults
//! baked into the binary, an optional user config file, environment variables
//! with the `APP` prefix, and command-line overrides, merged in that order
//! into a process-wide singleton.

use std::path::Path;
use std::sync::RwLock;

use clap::ArgMatches;
use config::{Config, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::types::LogLevel;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::default());
}

/// The deserialized view of the merged configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Enables debug mode.
    pub debug: bool,
    /// Logging verbosity.
    pub log_level: LogLevel,
    /// Project name used when a command does not specify one.
    pub project: String,
    /// Default OWNERS file name for the find-owners backend.
    pub owners_file: String,
    /// Optional path to a JSON accounts fixture consumed by the CLI.
    pub accounts_file: Option<String>,
}

impl AppConfig {
    /// Initialize the configuration singleton from the embedded defaults and
    /// the process environment.
    pub fn init(default_config: Option<&str>) -> Result<()> {
        let mut builder = Config::builder();

        // Embedded defaults come first so every key has a value.
        if let Some(config_contents) = default_config {
            builder = builder.add_source(File::from_str(config_contents, FileFormat::Toml));
        }

        // Environment variables with an APP prefix override the defaults.
        builder = builder.add_source(Environment::with_prefix("APP"));

        let config = builder.build()?;
        *Self::write_lock()? = config;

        Ok(())
    }

    /// Merge a user-provided configuration file over the current state.
    pub fn merge_config(config_file: Option<&Path>) -> Result<()> {
        if let Some(path) = config_file {
            let merged = Config::builder()
                .add_source(Self::snapshot()?)
                .add_source(File::from(path.to_path_buf()))
                .build()?;
            *Self::write_lock()? = merged;
        }

        Ok(())
    }

    /// Merge command-line arguments over the current state. Only arguments
    /// the user actually supplied override the configuration.
    pub fn merge_args(args: ArgMatches) -> Result<()> {
        if args.value_source("debug") == Some(clap::parser::ValueSource::CommandLine) {
            if let Some(debug) = args.get_one::<bool>("debug") {
                Self::set("debug", &debug.to_string())?;
            }
        }

        if args.value_source("log_level") == Some(clap::parser::ValueSource::CommandLine) {
            if let Some(level) = args.get_one::<LogLevel>("log_level") {
                Self::set("log_level", &level.to_string())?;
            }
        }

        Ok(())
    }

    /// Override a single key.
    pub fn set(key: &str, value: &str) -> Result<()> {
        let merged = Config::builder()
            .add_source(Self::snapshot()?)
            .set_override(key, value)?
            .build()?;
        *Self::write_lock()? = merged;

        Ok(())
    }

    /// Get a single typed value by key.
    pub fn get<'de, T: Deserialize<'de>>(key: &str) -> Result<T> {
        Ok(Self::read_lock()?.get::<T>(key)?)
    }

    /// Deserialize the whole configuration into an [`AppConfig`] value.
    pub fn fetch() -> Result<AppConfig> {
        Ok(Self::snapshot()?.try_deserialize()?)
    }

    fn snapshot() -> Result<Config> {
        Ok(Self::read_lock()?.clone())
    }

    fn read_lock() -> Result<std::sync::RwLockReadGuard<'static, Config>> {
        CONFIG
            .read()
            .map_err(|_| Error::new("configuration lock poisoned"))
    }

    fn write_lock() -> Result<std::sync::RwLockWriteGuard<'static, Config>> {
        CONFIG
            .write()
            .map_err(|_| Error::new("configuration lock poisoned"))
    }
}
