//! Store configuration.
//!
//! Defaults suit a single tabletop group; every value can be overridden
//! through the builder methods or through `TAVERN_*` environment variables.

use crate::error::StoreError;
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of raw messages retained per channel.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Default history length at which a summarization job is started.
pub const DEFAULT_SUMMARY_TRIGGER: usize = 20;

/// Default number of messages kept after a summary is written.
pub const DEFAULT_SUMMARY_KEEP: usize = 5;

/// Directory scenario files are read from.
pub const DEFAULT_SCENARIO_DIR: &str = "background";

/// Scenario file applied at startup when present.
pub const DEFAULT_SCENARIO_FILE: &str = "bg.md";

/// Scene used until an operator sets one.
pub const DEFAULT_SCENARIO: &str = "You are in a small tavern called the Glimmering Lantern \
on the edge of a forgotten realm. A storm rages outside, the hearth fire flickers, \
and the innkeeper is polishing a tankard.";

/// Configuration for a [`GameStore`](crate::store::GameStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum messages kept in a channel's history before eviction.
    pub max_history: usize,

    /// History length that triggers background summarization.
    pub summary_trigger: usize,

    /// Messages kept after a summary is written.
    pub summary_keep: usize,

    /// Directory snapshots are written to and scanned from.
    pub snapshot_dir: PathBuf,

    /// Initial scenario text.
    pub scenario: String,

    /// Directory holding scenario files.
    pub scenario_dir: PathBuf,

    /// Scenario file in `scenario_dir` that takes precedence at startup.
    pub scenario_file: Option<String>,
}

impl StoreConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            summary_trigger: DEFAULT_SUMMARY_TRIGGER,
            summary_keep: DEFAULT_SUMMARY_KEEP,
            snapshot_dir: PathBuf::from("."),
            scenario: DEFAULT_SCENARIO.to_string(),
            scenario_dir: PathBuf::from(DEFAULT_SCENARIO_DIR),
            scenario_file: Some(DEFAULT_SCENARIO_FILE.to_string()),
        }
    }

    /// Build a config from `TAVERN_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::new();

        if let Some(value) = lookup("TAVERN_MAX_HISTORY") {
            config.max_history = parse_var("TAVERN_MAX_HISTORY", &value)?;
        }
        if let Some(value) = lookup("TAVERN_SUMMARY_TRIGGER") {
            config.summary_trigger = parse_var("TAVERN_SUMMARY_TRIGGER", &value)?;
        }
        if let Some(value) = lookup("TAVERN_SUMMARY_KEEP") {
            config.summary_keep = parse_var("TAVERN_SUMMARY_KEEP", &value)?;
        }
        if let Some(dir) = lookup("TAVERN_SNAPSHOT_DIR") {
            config.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(scenario) = lookup("TAVERN_SCENARIO") {
            config.scenario = scenario;
        }
        if let Some(dir) = lookup("TAVERN_SCENARIO_DIR") {
            config.scenario_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("TAVERN_SCENARIO_FILE") {
            let file = file.trim();
            config.scenario_file = (!file.is_empty()).then(|| file.to_string());
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the history cap.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Set the summarization trigger length.
    pub fn with_summary_trigger(mut self, trigger: usize) -> Self {
        self.summary_trigger = trigger;
        self
    }

    /// Set how many messages survive a summary.
    pub fn with_summary_keep(mut self, keep: usize) -> Self {
        self.summary_keep = keep;
        self
    }

    /// Set the snapshot directory.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Set the initial scenario text.
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = scenario.into();
        self
    }

    /// Set the scenario directory.
    pub fn with_scenario_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scenario_dir = dir.into();
        self
    }

    /// Set the startup scenario file, or `None` to keep the snapshot's.
    pub fn with_scenario_file(mut self, file: Option<String>) -> Self {
        self.scenario_file = file;
        self
    }

    /// Check the settings are usable together.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_history == 0 {
            return Err(StoreError::invalid("max_history must be at least 1"));
        }
        if self.summary_trigger == 0 {
            return Err(StoreError::invalid("summary_trigger must be at least 1"));
        }
        if self.summary_keep > self.max_history {
            return Err(StoreError::invalid(format!(
                "summary_keep ({}) cannot exceed max_history ({})",
                self.summary_keep, self.max_history
            )));
        }
        if let Some(file) = &self.scenario_file {
            check_scenario_file_name(file)?;
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject scenario file names that could leave the scenario directory.
pub fn check_scenario_file_name(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() || name.contains("..") || name.contains(['/', '\\']) {
        return Err(StoreError::invalid(format!(
            "'{name}' is not a valid scenario file name"
        )));
    }
    Ok(())
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, StoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::invalid(format!("{key} must be a number, got '{value}'")))
}
