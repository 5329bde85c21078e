//! Error types for capacity checks.

use thiserror::Error;

use uplink_model::{FecRate, Modulation};

use crate::budget::CapacityReport;

/// A capacity check failed. Values are reported as computed, never clamped.
#[derive(Debug, Error)]
pub enum CapacityError {
    /// Services plus signalling need more than the channel carries.
    #[error("Required {required_bps} bps exceeds channel capacity {available_bps} bps")]
    CapacityExceeded {
        required_bps: u64,
        available_bps: u64,
        report: CapacityReport,
    },

    /// The entered multiplex rate does not match the transmission parameters.
    #[error(
        "Entered multiplex rate {entered_bps} bps differs from derived {derived_bps} bps \
         by more than {tolerance_bps} bps"
    )]
    ParameterMismatch {
        entered_bps: u64,
        derived_bps: u64,
        tolerance_bps: u64,
    },

    /// The FEC rate is not defined for the modulation.
    #[error("FEC {fec} is not defined for {modulation}")]
    UnsupportedCombination { modulation: Modulation, fec: FecRate },
}
