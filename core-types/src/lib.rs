// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared data model, configuration, and monitoring traits for the trigger decision pipeline.

pub mod config;
pub mod status;
pub mod types;

pub use config::{
    AppConfig, ConfigError, ConnectionsConfig, LinkConfig, ModuleLevelTriggerConfig,
    SignalOffsets, TimingCandidateMakerConfig,
};
pub use status::{MetricSample, ServiceMetricsReporter, render_samples};
pub use types::{
    CandidateType, ComponentRequest, LinkId, ReadoutType, RunNumber, SystemType,
    SystemTypeError, TimeStampedData, Timestamp, TpSet, TriggerCandidate, TriggerDecision,
    TriggerInhibit, TriggerNumber, TriggerPrimitive, TriggerType,
};
