//! Error types for schedule operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use uplink_model::{EntryId, ModelError};

/// Errors that reject a schedule operation. The stored schedule is never modified.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Two entries claim the same time.
    #[error("Entries {first} ({first_title}) and {second} ({second_title}) overlap")]
    Conflict {
        first: EntryId,
        first_title: String,
        second: EntryId,
        second_title: String,
    },

    /// An entry has a zero or negative duration.
    #[error("Entry {entry} ({title}) has invalid duration {duration_secs}s")]
    InvalidDuration {
        entry: EntryId,
        title: String,
        duration_secs: i64,
    },

    /// The horizon ends before the first entry does.
    #[error("Horizon {horizon_end} ends before the first entry ends at {first_end}")]
    HorizonTooShort {
        horizon_end: DateTime<Utc>,
        first_end: DateTime<Utc>,
    },

    /// An operator entry runs past the horizon.
    #[error("Entry {entry} ({title}) ends after the horizon {horizon_end}")]
    BeyondHorizon {
        entry: EntryId,
        title: String,
        horizon_end: DateTime<Utc>,
    },

    /// Generation was asked for an empty time range.
    #[error("Horizon {horizon_end} does not end after {epoch}")]
    EmptyHorizon {
        epoch: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    },

    /// An entry is longer than a guide event can describe.
    #[error("Entry {entry} ({title}) lasts {duration_secs}s, longer than a guide event allows")]
    TooLong {
        entry: EntryId,
        title: String,
        duration_secs: i64,
    },

    /// Guide document could not be read.
    #[error("Malformed guide data: {0}")]
    MalformedGuide(String),

    /// Entries are not sorted by start.
    #[error("Entry {0} starts before its predecessor")]
    Unordered(EntryId),

    /// No entry with this id.
    #[error("Entry {0} not found")]
    EntryNotFound(EntryId),

    /// Model lookup failed.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ScheduleError {
    /// Returns true for overlap errors, false for malformed data.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
