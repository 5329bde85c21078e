//! Error types for the session model.

use thiserror::Error;

use crate::transmission::{FecRate, Modulation};

/// Errors raised while editing, validating or persisting a session.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Two services share a program number.
    #[error("Service id {0} is already in use")]
    DuplicateServiceId(u16),

    /// No service with this program number.
    #[error("Service {0} not found")]
    ServiceNotFound(u16),

    /// Program number 0 is reserved for the network information table.
    #[error("Service id 0 is reserved")]
    ReservedServiceId,

    /// Service name is empty.
    #[error("Service {0} has no name")]
    EmptyServiceName(u16),

    /// Encoding options are inconsistent.
    #[error("Invalid encoding for service {service}: {reason}")]
    InvalidEncoding { service: u16, reason: String },

    /// Input configuration is inconsistent.
    #[error("Invalid input for service {service}: {reason}")]
    InvalidInput { service: u16, reason: String },

    /// Transmission parameters are out of range.
    #[error("Invalid transmission parameters: {0}")]
    InvalidTransmission(String),

    /// FEC rate not defined for the modulation.
    #[error("FEC {fec} is not available with {modulation}")]
    UnsupportedFec { modulation: Modulation, fec: FecRate },

    /// Language code is not three lowercase ASCII letters.
    #[error("Invalid ISO 639-2 language code: {0:?}")]
    InvalidLanguageCode(String),

    /// Every schedule entry identifier is taken.
    #[error("No free schedule entry identifiers left")]
    EntryIdsExhausted,

    /// Session document was written by an incompatible version.
    #[error("Unsupported session format version {0}")]
    UnsupportedFormatVersion(u32),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
