// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Detector clock ticks.
pub type Timestamp = u64;
pub type RunNumber = u32;
pub type TriggerNumber = u64;
pub type TriggerType = u16;

/// Source kind of a trigger candidate.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateType {
    #[default]
    Unknown = 0,
    Timing = 1,
    TpcLowE = 2,
    Supernova = 3,
    Random = 4,
    Prescale = 5,
    AdcSimpleWindow = 6,
    HorizontalMuon = 7,
    Ctb = 8,
}

impl CandidateType {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Time-windowed signal of interest proposed for readout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCandidate {
    pub time_start: Timestamp,
    pub time_end: Timestamp,
    pub time_candidate: Timestamp,
    pub detector_id: u16,
    pub candidate_type: CandidateType,
    pub algorithm: u32,
    pub version: u16,
    /// Ids of the activities that contributed to this candidate, possibly empty.
    pub contributing_list: Vec<u64>,
}

/// Detector subsystem addressed by a readout link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemType {
    Tpc,
    Pds,
    DataSelection,
    NdLarTpc,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Tpc => "TPC",
            SystemType::Pds => "PDS",
            SystemType::DataSelection => "DataSelection",
            SystemType::NdLarTpc => "NDLArTPC",
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown readout system type {name:?}")]
pub struct SystemTypeError {
    pub name: String,
}

impl FromStr for SystemType {
    type Err = SystemTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "TPC" => Ok(SystemType::Tpc),
            "PDS" => Ok(SystemType::Pds),
            "DataSelection" => Ok(SystemType::DataSelection),
            "NDLArTPC" => Ok(SystemType::NdLarTpc),
            other => Err(SystemTypeError {
                name: other.to_string(),
            }),
        }
    }
}

/// Address of one readout link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId {
    pub system: SystemType,
    pub region: u16,
    pub element: u32,
}

impl LinkId {
    pub fn new(system: SystemType, region: u16, element: u32) -> Self {
        Self {
            system,
            region,
            element,
        }
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.system, self.region, self.element)
    }
}

/// Request for one link to extract `[window_begin, window_end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequest {
    pub link_id: LinkId,
    pub window_begin: Timestamp,
    pub window_end: Timestamp,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadoutType {
    #[default]
    Invalid = 0,
    Localized = 1,
}

/// Instruction to the readout to extract data for one admitted candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub trigger_number: TriggerNumber,
    pub run_number: RunNumber,
    pub trigger_timestamp: Timestamp,
    pub readout_type: ReadoutType,
    pub trigger_type: TriggerType,
    pub components: Vec<ComponentRequest>,
}

/// Busy/inhibit backpressure message from the downstream decision consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInhibit {
    pub run_number: RunNumber,
    pub busy: bool,
}

/// Timing-system signal consumed by the timing candidate maker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStampedData {
    pub time_stamp: Timestamp,
    pub signal_type: u32,
    pub counter: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPrimitive {
    pub time_start: Timestamp,
    pub time_over_threshold: Timestamp,
    pub time_peak: Timestamp,
    pub channel: u32,
    pub adc_integral: u32,
    pub adc_peak: u16,
    pub detector_id: u16,
}

/// Primitives from one link covering `[start_time, end_time]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpSet {
    pub seqno: u64,
    pub origin: Option<LinkId>,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub objects: Vec<TriggerPrimitive>,
}

impl TpSet {
    pub fn new(seqno: u64, start_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            seqno,
            start_time,
            end_time,
            ..Default::default()
        }
    }
}
