//! Programme guide data held per service.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::language::LanguageCode;

/// Identifier of a schedule entry, unique within its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u32);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an entry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Entered by the operator. Survives regeneration.
    Manual,

    /// Derived from input durations.
    Generated,

    /// Inserted to close a gap.
    Filler,
}

/// DVB content descriptor nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentType {
    pub level1: u8,
    pub level2: u8,
}

impl ContentType {
    /// Undefined content (0xF/0x0).
    pub const UNDEFINED: ContentType = ContentType {
        level1: 15,
        level2: 0,
    };

    /// Returns true if both values fit in a nibble.
    pub fn is_valid(&self) -> bool {
        self.level1 <= 0x0F && self.level2 <= 0x0F
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// Minimum viewer age for one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParentalRating {
    /// ISO 3166 alpha-3 country code.
    pub country: String,

    /// Minimum age in years.
    pub min_age: u8,
}

impl ParentalRating {
    /// Rating byte as carried in the parental rating descriptor.
    ///
    /// DVB encodes ages 4 to 18 as `age - 3`; other ages are not encodable.
    pub fn dvb_rating(&self) -> Option<u8> {
        match self.min_age {
            4..=18 => Some(self.min_age - 3),
            _ => None,
        }
    }
}

/// Descriptive data of a guide event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventMetadata {
    #[serde(default)]
    pub short_description: String,

    #[serde(default)]
    pub extended_description: String,

    #[serde(default)]
    pub language: LanguageCode,

    #[serde(default)]
    pub content: ContentType,

    #[serde(default)]
    pub rating: Option<ParentalRating>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            short_description: String::new(),
            extended_description: String::new(),
            language: LanguageCode::english(),
            content: ContentType::UNDEFINED,
            rating: None,
        }
    }
}

/// Longest span an entry can describe, about a century.
const MAX_SPAN_SECS: i64 = 100 * 366 * 24 * 3600;

/// One programme in a service's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleEntry {
    pub id: EntryId,
    pub title: String,
    pub start: DateTime<Utc>,

    /// Duration in seconds. Signed so malformed values survive until validation.
    pub duration_secs: i64,

    pub origin: EntryOrigin,

    #[serde(default)]
    pub metadata: EventMetadata,
}

impl ScheduleEntry {
    /// End of the entry (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(self.duration_secs.clamp(-MAX_SPAN_SECS, MAX_SPAN_SECS))
    }

    /// Returns true if `at` falls within the entry.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end()
    }

    /// Returns true if the entries share any instant.
    pub fn overlaps(&self, other: &ScheduleEntry) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A service's schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Epg {
    /// Entries ordered by start.
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,

    /// Start of the covered horizon, once one has been requested.
    #[serde(default)]
    pub horizon_start: Option<DateTime<Utc>>,

    /// End of the covered horizon, once one has been requested.
    #[serde(default)]
    pub horizon_end: Option<DateTime<Utc>>,

    /// Next identifier to hand out.
    #[serde(default)]
    pub next_id: u32,
}

impl Epg {
    /// Lowest identifier not used by any entry, at least `next_id`.
    pub fn first_free_id(&self) -> Result<u32, ModelError> {
        let mut free = self.next_id;
        for entry in &self.entries {
            let after = entry
                .id
                .0
                .checked_add(1)
                .ok_or(ModelError::EntryIdsExhausted)?;
            free = free.max(after);
        }
        Ok(free)
    }

    /// Hand out a fresh entry identifier.
    pub fn allocate_id(&mut self) -> Result<EntryId, ModelError> {
        let id = self.first_free_id()?;
        self.next_id = id.checked_add(1).ok_or(ModelError::EntryIdsExhausted)?;
        Ok(EntryId(id))
    }

    /// Look up an entry.
    pub fn entry(&self, id: EntryId) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries entered by the operator.
    pub fn manual_entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.origin == EntryOrigin::Manual)
    }

    /// The entry on air at `at`, if any.
    pub fn current(&self, at: DateTime<Utc>) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.contains(at))
    }
}

/// Template for entries the schedule engine creates on its own.
///
/// Text fields may use `{stem}`, `{file}`, `{service}` and `{index}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryTemplate {
    pub title: String,
    pub short_description: String,
    pub extended_description: String,

    #[serde(default)]
    pub language: LanguageCode,

    #[serde(default)]
    pub content: ContentType,

    #[serde(default)]
    pub rating: Option<ParentalRating>,
}

/// Defaults for generated and filler entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuideDefaults {
    pub generated: EntryTemplate,
    pub filler: EntryTemplate,
}

impl Default for GuideDefaults {
    fn default() -> Self {
        Self {
            generated: EntryTemplate {
                title: "{stem}".to_string(),
                short_description: "Auto-generated event.".to_string(),
                extended_description: "Playing file: {file}".to_string(),
                language: LanguageCode::english(),
                content: ContentType::UNDEFINED,
                rating: None,
            },
            filler: EntryTemplate {
                title: "To Be Announced".to_string(),
                short_description: "Information not available.".to_string(),
                extended_description: String::new(),
                language: LanguageCode::english(),
                content: ContentType::UNDEFINED,
                rating: None,
            },
        }
    }
}
