//! Schedule generation and the invariant pass.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use uplink_model::{
    EntryOrigin, Epg, GuideDefaults, MediaItem, ScheduleEntry, Service, ServiceId, Session,
};

use crate::error::ScheduleError;
use crate::guide::MAX_EVENT_SECS;
use crate::timeline::{after, render, whole_seconds, IdSource, TemplateVars, Timeline};
use crate::ScheduleResult;

/// Longest single filler entry. Longer gaps get several.
pub const MAX_FILLER_SECS: i64 = 6 * 3600;

/// Builds and repairs service schedules.
#[derive(Debug, Clone, Default)]
pub struct ScheduleEngine {
    defaults: GuideDefaults,
}

impl ScheduleEngine {
    /// Create an engine using the given entry templates.
    pub fn new(defaults: GuideDefaults) -> Self {
        Self { defaults }
    }

    /// Create an engine using the session's guide defaults.
    pub fn for_session(session: &Session) -> Self {
        Self::new(session.guide.clone())
    }

    /// Rebuild generated entries for `[epoch, horizon_end)`, keeping manual ones.
    #[instrument(name = "regenerate_schedule", skip(self, service), fields(service_id = %service.id))]
    pub fn regenerate(
        &self,
        service: &Service,
        epoch: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    ) -> ScheduleResult<Epg> {
        let epoch = whole_seconds(epoch);
        let horizon_end = whole_seconds(horizon_end);
        if horizon_end <= epoch {
            return Err(ScheduleError::EmptyHorizon { epoch, horizon_end });
        }

        let mut epg = service.epg.clone();
        let mut ids = IdSource::for_epg(&epg)?;
        epg.entries.retain(|e| e.origin == EntryOrigin::Manual);
        epg.horizon_start = Some(epoch);
        epg.horizon_end = Some(horizon_end);

        let generated = self.generate(service, &mut epg.entries, &mut ids, epoch, horizon_end)?;
        debug!(generated, "Generated entries");

        epg.next_id = ids.peek();
        self.finalize(&service.name, &mut epg)?;
        Ok(epg)
    }

    /// Lay the service's media items end to end from `epoch`. Returns the entry count.
    fn generate(
        &self,
        service: &Service,
        entries: &mut Vec<ScheduleEntry>,
        ids: &mut IdSource,
        epoch: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    ) -> ScheduleResult<usize> {
        let items: Vec<&MediaItem> = service
            .inputs
            .iter()
            .flat_map(|input| input.source.media_items())
            .filter(|item| item.duration_secs.unwrap_or(0) > 0)
            .collect();

        let total: usize = service
            .inputs
            .iter()
            .map(|input| input.source.media_items().len())
            .sum();
        if items.len() < total {
            warn!(
                skipped = total - items.len(),
                "Media items without a known duration are not scheduled"
            );
        }
        if items.is_empty() {
            return Ok(0);
        }

        let before = entries.len();
        let mut timeline = Timeline::new(entries, ids, epoch, Some(horizon_end));
        let mut index = 0;
        'passes: loop {
            for item in &items {
                index += 1;
                let stem = item.display_stem();
                let file = item.file_name();
                let vars = TemplateVars {
                    stem: &stem,
                    file: &file,
                    service: &service.name,
                    index,
                };
                let (title, metadata) = render(&self.defaults.generated, &vars);
                let duration = i64::try_from(item.duration_secs.unwrap_or(0)).unwrap_or(i64::MAX);
                if !timeline.push(title, duration, EntryOrigin::Generated, metadata)? {
                    break 'passes;
                }
            }
            if !service.looping {
                break;
            }
        }
        Ok(entries.len() - before)
    }

    /// Run the invariant pass: sort, clip, check overlaps and horizon, fill gaps.
    ///
    /// Filler entries are always rebuilt from scratch. Coverage starts at the
    /// horizon start, or at the first entry when that is earlier or unset.
    pub fn finalize(&self, service_name: &str, epg: &mut Epg) -> ScheduleResult<()> {
        let mut ids = IdSource::for_epg(epg)?;
        let horizon_start = epg.horizon_start.map(whole_seconds);
        let horizon = epg.horizon_end.map(whole_seconds);

        let mut entries: Vec<ScheduleEntry> = epg
            .entries
            .iter()
            .filter(|e| e.origin != EntryOrigin::Filler)
            .cloned()
            .collect();

        for entry in &mut entries {
            entry.start = whole_seconds(entry.start);
            check_duration(entry)?;
            if entry.origin == EntryOrigin::Manual && entry.duration_secs > MAX_EVENT_SECS {
                return Err(too_long(entry));
            }
        }

        let mut entries = clip_generated(entries, &mut ids, horizon)?;
        check_overlaps(&entries)?;
        if let Some(horizon_end) = horizon {
            check_horizon(&entries, horizon_end)?;
        }

        let vars = TemplateVars {
            stem: "",
            file: "",
            service: service_name,
            index: 0,
        };
        let first_start = entries.first().map(|e| e.start);
        let origin = match (horizon_start, first_start) {
            (Some(start), Some(first)) => Some(start.min(first)),
            (start, first) => start.or(first),
        };

        let mut filled = Vec::with_capacity(entries.len());
        if let Some(mut cursor) = origin {
            for entry in entries.drain(..) {
                if entry.start > cursor {
                    Timeline::new(&mut filled, &mut ids, cursor, Some(entry.start)).fill(
                        &self.defaults.filler,
                        &vars,
                        MAX_FILLER_SECS,
                    )?;
                }
                cursor = entry.end();
                filled.push(entry);
            }
            if let Some(horizon_end) = horizon.filter(|&h| h > cursor) {
                Timeline::new(&mut filled, &mut ids, cursor, Some(horizon_end)).fill(
                    &self.defaults.filler,
                    &vars,
                    MAX_FILLER_SECS,
                )?;
            }
        }

        epg.entries = filled;
        epg.horizon_start = horizon_start;
        epg.horizon_end = horizon;
        epg.next_id = ids.peek();
        Ok(())
    }

    /// Check a stored schedule without changing it.
    pub fn verify(epg: &Epg) -> ScheduleResult<()> {
        for entry in &epg.entries {
            check_duration(entry)?;
            if entry.duration_secs > MAX_EVENT_SECS {
                return Err(too_long(entry));
            }
        }
        for pair in epg.entries.windows(2) {
            if pair[1].start < pair[0].start {
                return Err(ScheduleError::Unordered(pair[1].id));
            }
        }
        check_overlaps(&epg.entries)
    }

    /// Regenerate one service's schedule inside a session.
    pub fn regenerate_service(
        &self,
        session: &mut Session,
        id: ServiceId,
        epoch: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    ) -> ScheduleResult<usize> {
        let service = session
            .service(id)
            .ok_or(uplink_model::ModelError::ServiceNotFound(id.0))?;
        let epg = self.regenerate(service, epoch, horizon_end)?;
        let count = epg.entries.len();
        session.service_mut(id)?.epg = epg;
        Ok(count)
    }
}

fn check_duration(entry: &ScheduleEntry) -> ScheduleResult<()> {
    if entry.duration_secs <= 0 {
        return Err(ScheduleError::InvalidDuration {
            entry: entry.id,
            title: entry.title.clone(),
            duration_secs: entry.duration_secs,
        });
    }
    Ok(())
}

fn too_long(entry: &ScheduleEntry) -> ScheduleError {
    ScheduleError::TooLong {
        entry: entry.id,
        title: entry.title.clone(),
        duration_secs: entry.duration_secs,
    }
}

fn sort_entries(entries: &mut [ScheduleEntry]) {
    entries.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
}

/// Cut generated entries around manual ones and at the horizon, and into
/// pieces no longer than a guide event.
fn clip_generated(
    entries: Vec<ScheduleEntry>,
    ids: &mut IdSource,
    horizon: Option<DateTime<Utc>>,
) -> ScheduleResult<Vec<ScheduleEntry>> {
    let manual: Vec<(DateTime<Utc>, DateTime<Utc>)> = entries
        .iter()
        .filter(|e| e.origin == EntryOrigin::Manual)
        .map(|e| (e.start, e.end()))
        .collect();

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.origin == EntryOrigin::Manual {
            out.push(entry);
            continue;
        }

        let mut pieces = vec![(entry.start, entry.end())];
        for &blocker in &manual {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| subtract(piece, blocker))
                .collect();
        }
        if let Some(horizon_end) = horizon {
            pieces = pieces
                .into_iter()
                .filter(|&(start, _)| start < horizon_end)
                .map(|(start, end)| (start, end.min(horizon_end)))
                .collect();
        }
        pieces = pieces.into_iter().flat_map(split_long).collect();

        let mut first = true;
        for (start, end) in pieces {
            let mut piece = entry.clone();
            if !first {
                piece.id = ids.next()?;
            }
            first = false;
            piece.start = start;
            piece.duration_secs = (end - start).num_seconds();
            out.push(piece);
        }
    }

    sort_entries(&mut out);
    Ok(out)
}

fn split_long(
    (start, end): (DateTime<Utc>, DateTime<Utc>),
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut out = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = after(cursor, MAX_EVENT_SECS).min(end);
        out.push((cursor, next));
        cursor = next;
    }
    out
}

/// `piece` minus `blocker`, as zero, one or two intervals.
fn subtract(
    piece: (DateTime<Utc>, DateTime<Utc>),
    blocker: (DateTime<Utc>, DateTime<Utc>),
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = piece;
    let (b_start, b_end) = blocker;
    if b_end <= start || b_start >= end {
        return vec![piece];
    }
    let mut rest = Vec::with_capacity(2);
    if b_start > start {
        rest.push((start, b_start));
    }
    if b_end < end {
        rest.push((b_end, end));
    }
    rest
}

/// Sorted entries overlap iff some neighbouring pair does.
fn check_overlaps(entries: &[ScheduleEntry]) -> ScheduleResult<()> {
    for pair in entries.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(ScheduleError::Conflict {
                first: pair[0].id,
                first_title: pair[0].title.clone(),
                second: pair[1].id,
                second_title: pair[1].title.clone(),
            });
        }
    }
    Ok(())
}

fn check_horizon(entries: &[ScheduleEntry], horizon_end: DateTime<Utc>) -> ScheduleResult<()> {
    let Some(first) = entries.first() else {
        return Ok(());
    };
    if first.end() > horizon_end {
        return Err(ScheduleError::HorizonTooShort {
            horizon_end,
            first_end: first.end(),
        });
    }
    if let Some(late) = entries.iter().find(|e| e.end() > horizon_end) {
        return Err(ScheduleError::BeyondHorizon {
            entry: late.id,
            title: late.title.clone(),
            horizon_end,
        });
    }
    Ok(())
}
