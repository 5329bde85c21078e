//! Programme schedule engine for the uplink broadcaster.
//!
//! Keeps every service's schedule ordered, overlap-free and gap-free, and
//! renders it as EIT XML for the multiplexer's guide injector. Existing EIT
//! XML can be read back and merged as manual entries.

mod edit;
mod engine;
mod error;
mod guide;
mod timeline;

pub use edit::{EntryDraft, EpgEdit};
pub use engine::{ScheduleEngine, MAX_FILLER_SECS};
pub use error::ScheduleError;
pub use guide::{
    escape as escape_xml, has_guide_data, parse_eit_xml, render_eit_xml, GuideEvent,
    EVENT_ID_BASE, MAX_EVENT_SECS,
};

/// Result type for schedule operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;
