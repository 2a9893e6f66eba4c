// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::path::Path;

use config::{Config, ConfigError as SourceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RunNumber, SystemType, Timestamp};

const CONFIG_FILE: &str = "trigger.toml";
const ENV_PREFIX: &str = "TRIGGER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config source error: {0}")]
    Source(#[from] SourceError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One readout link as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub system: String,
    pub region: u16,
    pub element: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLevelTriggerConfig {
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default = "default_decision_connection")]
    pub dfo_connection: String,
    #[serde(default = "default_busy_connection")]
    pub dfo_busy_connection: String,
    #[serde(default)]
    pub hsi_trigger_type_passthrough: bool,
}

impl Default for ModuleLevelTriggerConfig {
    fn default() -> Self {
        Self {
            links: Vec::new(),
            dfo_connection: default_decision_connection(),
            dfo_busy_connection: default_busy_connection(),
            hsi_trigger_type_passthrough: false,
        }
    }
}

fn default_decision_connection() -> String {
    "trigger_decisions".to_string()
}

fn default_busy_connection() -> String {
    "dfo_busy".to_string()
}

/// Readout window around a timing signal of the given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalOffsets {
    pub signal_type: u32,
    pub time_before: Timestamp,
    pub time_after: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingCandidateMakerConfig {
    #[serde(default)]
    pub signals: Vec<SignalOffsets>,
}

/// Queue names and capacities for the in-process connection registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_timing_connection")]
    pub timing_data: String,
    #[serde(default = "default_candidate_connection")]
    pub trigger_candidates: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            timing_data: default_timing_connection(),
            trigger_candidates: default_candidate_connection(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_timing_connection() -> String {
    "timing_data".to_string()
}

fn default_candidate_connection() -> String {
    "trigger_candidates".to_string()
}

fn default_queue_capacity() -> usize {
    1_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_run_number")]
    pub run_number: RunNumber,
    /// Period of the built-in timing pulser; zero disables it.
    #[serde(default)]
    pub pulser_interval_ms: u64,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub mlt: ModuleLevelTriggerConfig,
    #[serde(default)]
    pub timing: TimingCandidateMakerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            run_number: default_run_number(),
            pulser_interval_ms: 0,
            status_interval_secs: default_status_interval_secs(),
            connections: ConnectionsConfig::default(),
            mlt: ModuleLevelTriggerConfig::default(),
            timing: TimingCandidateMakerConfig::default(),
        }
    }
}

fn default_run_number() -> RunNumber {
    1
}

fn default_status_interval_secs() -> u64 {
    30
}

impl AppConfig {
    /// Layers `trigger.toml` (optional) under `TRIGGER__*` environment variables
    /// (`TRIGGER__RUN_NUMBER`, `TRIGGER__MLT__HSI_TRIGGER_TYPE_PASSTHROUGH`, ...).
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder().add_source(config::File::with_name(CONFIG_FILE).required(false)),
        )
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::from_builder(Config::builder().add_source(config::File::from(path)))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connections.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "connections.queue_capacity must be positive".to_string(),
            ));
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "status_interval_secs must be positive".to_string(),
            ));
        }
        for link in &self.mlt.links {
            link.system
                .parse::<SystemType>()
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(())
    }
}
