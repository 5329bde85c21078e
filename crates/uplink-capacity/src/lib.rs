//! Channel capacity for the uplink broadcaster.
//!
//! Derives the multiplex rate a transmission setup can carry, validates an
//! operator-entered rate against it and checks that the services fit.

mod budget;
mod error;
mod formula;

pub use budget::{check, check_session, demands_for, CapacityReport, ServiceDemand, SignallingOverhead};
pub use error::CapacityError;
pub use formula::{
    derive_mux_rate, effective_mux_rate, mux_rate_tolerance, validate_mux_rate, FrameBudget,
    TOLERANCE_PPM,
};

/// Result type for capacity operations.
pub type CapacityResult<T> = Result<T, CapacityError>;
