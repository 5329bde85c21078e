//! Operator edits to a single service's schedule.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use uplink_model::{
    EntryId, EntryOrigin, Epg, EventMetadata, ModelError, ScheduleEntry, Service, ServiceId,
    Session,
};

use crate::engine::ScheduleEngine;
use crate::error::ScheduleError;
use crate::timeline::IdSource;
use crate::ScheduleResult;

/// Operator-supplied contents of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration_secs: i64,
    pub metadata: EventMetadata,
}

/// A single schedule edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpgEdit {
    /// Add a manual entry.
    Insert(EntryDraft),

    /// Replace an entry's contents. The entry becomes manual.
    Update { id: EntryId, draft: EntryDraft },

    /// Remove an entry. Its slot is refilled on the next pass.
    Delete(EntryId),

    /// Copy an entry to start where the original ends.
    Duplicate(EntryId),

    /// Move the end of the covered horizon.
    SetHorizon(Option<DateTime<Utc>>),

    /// Cover `[start, end)` exactly.
    Cover {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Add imported events as manual entries. Existing manual entries they
    /// overlap are replaced.
    Import(Vec<EntryDraft>),
}

impl ScheduleEngine {
    /// Apply an edit to a copy of the service's schedule and re-run the invariant pass.
    ///
    /// Returns the new schedule and the id of the entry the edit created or changed.
    pub fn apply(&self, service: &Service, edit: EpgEdit) -> ScheduleResult<(Epg, Option<EntryId>)> {
        let mut epg = service.epg.clone();
        let mut ids = IdSource::for_epg(&epg)?;

        let touched = match edit {
            EpgEdit::Insert(draft) => {
                let id = ids.next()?;
                epg.entries.push(manual_entry(id, draft));
                Some(id)
            }
            EpgEdit::Update { id, draft } => {
                let entry = epg
                    .entries
                    .iter_mut()
                    .find(|e| e.id == id)
                    .ok_or(ScheduleError::EntryNotFound(id))?;
                *entry = manual_entry(id, draft);
                Some(id)
            }
            EpgEdit::Delete(id) => {
                let before = epg.entries.len();
                epg.entries.retain(|e| e.id != id);
                if epg.entries.len() == before {
                    return Err(ScheduleError::EntryNotFound(id));
                }
                None
            }
            EpgEdit::Duplicate(id) => {
                let original = epg.entry(id).ok_or(ScheduleError::EntryNotFound(id))?;
                let copy = ScheduleEntry {
                    id: ids.next()?,
                    start: original.end(),
                    origin: EntryOrigin::Manual,
                    ..original.clone()
                };
                let copy_id = copy.id;
                epg.entries.push(copy);
                Some(copy_id)
            }
            EpgEdit::SetHorizon(horizon_end) => {
                epg.horizon_end = horizon_end;
                None
            }
            EpgEdit::Cover { start, end } => {
                if end <= start {
                    return Err(ScheduleError::EmptyHorizon {
                        epoch: start,
                        horizon_end: end,
                    });
                }
                epg.horizon_start = Some(start);
                epg.horizon_end = Some(end);
                None
            }
            EpgEdit::Import(drafts) => {
                let mut imported = Vec::with_capacity(drafts.len());
                for draft in drafts {
                    imported.push(manual_entry(ids.next()?, draft));
                }
                epg.entries.retain(|e| {
                    e.origin != EntryOrigin::Manual || !imported.iter().any(|i| i.overlaps(e))
                });
                debug!(imported = imported.len(), kept = epg.entries.len(), "Importing entries");
                epg.entries.extend(imported);
                None
            }
        };

        epg.next_id = ids.peek();
        self.finalize(&service.name, &mut epg)?;
        Ok((epg, touched))
    }

    /// Apply an edit to one service of a session. Other services are not touched.
    #[instrument(name = "edit_schedule", skip(self, session))]
    pub fn edit_service(
        &self,
        session: &mut Session,
        id: ServiceId,
        edit: EpgEdit,
    ) -> ScheduleResult<Option<EntryId>> {
        let service = session
            .service(id)
            .ok_or(ModelError::ServiceNotFound(id.0))?;
        let (epg, touched) = self.apply(service, edit)?;
        debug!(entries = epg.entries.len(), "Schedule edited");
        session.service_mut(id)?.epg = epg;
        Ok(touched)
    }
}

fn manual_entry(id: EntryId, draft: EntryDraft) -> ScheduleEntry {
    ScheduleEntry {
        id,
        title: draft.title,
        start: draft.start,
        duration_secs: draft.duration_secs,
        origin: EntryOrigin::Manual,
        metadata: draft.metadata,
    }
}
