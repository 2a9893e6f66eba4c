use std::collections::HashMap;

use core_types::{
    CandidateType, TimeStampedData, Timestamp, TimingCandidateMakerConfig, TriggerCandidate,
};

use crate::MakerError;

/// Readout window offsets keyed by timing signal type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalOffsetTable {
    offsets: HashMap<u32, (Timestamp, Timestamp)>,
}

impl SignalOffsetTable {
    /// Later entries for the same signal type replace earlier ones.
    pub fn from_config(config: &TimingCandidateMakerConfig) -> Result<Self, MakerError> {
        if config.signals.is_empty() {
            return Err(MakerError::NoSignals);
        }
        let offsets = config
            .signals
            .iter()
            .map(|signal| (signal.signal_type, (signal.time_before, signal.time_after)))
            .collect();
        Ok(Self { offsets })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, signal_type: u32) -> Option<(Timestamp, Timestamp)> {
        self.offsets.get(&signal_type).copied()
    }

    pub fn convert(&self, data: &TimeStampedData) -> Result<TriggerCandidate, MakerError> {
        let (before, after) =
            self.get(data.signal_type)
                .ok_or(MakerError::UnknownSignalType {
                    signal_type: data.signal_type,
                })?;
        Ok(TriggerCandidate {
            time_start: data.time_stamp.saturating_sub(before),
            time_end: data.time_stamp.saturating_add(after),
            time_candidate: data.time_stamp,
            detector_id: data.signal_type as u16,
            candidate_type: CandidateType::Timing,
            algorithm: 0,
            version: 0,
            contributing_list: Vec::new(),
        })
    }
}
