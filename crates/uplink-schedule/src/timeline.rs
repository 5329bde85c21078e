//! Contiguous timeline assembly shared by generation and gap filling.

use chrono::{DateTime, Duration, SubsecRound, Utc};

use uplink_model::{
    EntryId, EntryOrigin, EntryTemplate, Epg, EventMetadata, ModelError, ScheduleEntry,
};

use crate::ScheduleResult;

/// Hands out entry ids that do not collide with existing ones.
pub(crate) struct IdSource {
    next: u32,
}

impl IdSource {
    pub(crate) fn for_epg(epg: &Epg) -> ScheduleResult<Self> {
        Ok(Self {
            next: epg.first_free_id()?,
        })
    }

    pub(crate) fn next(&mut self) -> ScheduleResult<EntryId> {
        let id = EntryId(self.next);
        self.next = self
            .next
            .checked_add(1)
            .ok_or(ModelError::EntryIdsExhausted)?;
        Ok(id)
    }

    pub(crate) fn peek(&self) -> u32 {
        self.next
    }
}

/// Values substituted into [`EntryTemplate`] text.
pub(crate) struct TemplateVars<'a> {
    pub stem: &'a str,
    pub file: &'a str,
    pub service: &'a str,
    pub index: usize,
}

impl TemplateVars<'_> {
    fn expand(&self, text: &str) -> String {
        text.replace("{stem}", self.stem)
            .replace("{file}", self.file)
            .replace("{service}", self.service)
            .replace("{index}", &self.index.to_string())
    }
}

/// Render a template into a title and metadata.
pub(crate) fn render(template: &EntryTemplate, vars: &TemplateVars<'_>) -> (String, EventMetadata) {
    let title = vars.expand(&template.title);
    let metadata = EventMetadata {
        short_description: vars.expand(&template.short_description),
        extended_description: vars.expand(&template.extended_description),
        language: template.language.clone(),
        content: template.content,
        rating: template.rating.clone(),
    };
    (title, metadata)
}

/// Drop sub-second precision; schedule arithmetic works in whole seconds.
pub(crate) fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}

/// Appends back-to-back entries from a cursor, never past an optional limit.
pub(crate) struct Timeline<'a> {
    entries: &'a mut Vec<ScheduleEntry>,
    ids: &'a mut IdSource,
    cursor: DateTime<Utc>,
    limit: Option<DateTime<Utc>>,
}

impl<'a> Timeline<'a> {
    pub(crate) fn new(
        entries: &'a mut Vec<ScheduleEntry>,
        ids: &'a mut IdSource,
        cursor: DateTime<Utc>,
        limit: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            entries,
            ids,
            cursor,
            limit,
        }
    }

    /// Append an entry at the cursor, truncated at the limit.
    ///
    /// Returns false once the limit has been reached.
    pub(crate) fn push(
        &mut self,
        title: String,
        duration_secs: i64,
        origin: EntryOrigin,
        metadata: EventMetadata,
    ) -> ScheduleResult<bool> {
        let mut duration_secs = duration_secs;
        if let Some(limit) = self.limit {
            let remaining = (limit - self.cursor).num_seconds();
            if remaining <= 0 {
                return Ok(false);
            }
            duration_secs = duration_secs.min(remaining);
        }
        if duration_secs <= 0 {
            return Ok(self.has_room());
        }

        let entry = ScheduleEntry {
            id: self.ids.next()?,
            title,
            start: self.cursor,
            duration_secs,
            origin,
            metadata,
        };
        self.cursor = entry.end();
        self.entries.push(entry);
        Ok(self.has_room())
    }

    /// Cover the rest of the range with entries of at most `chunk_secs`.
    pub(crate) fn fill(
        &mut self,
        template: &EntryTemplate,
        vars: &TemplateVars<'_>,
        chunk_secs: i64,
    ) -> ScheduleResult<()> {
        if self.limit.is_none() {
            return Ok(());
        }
        let (title, metadata) = render(template, vars);
        while self.push(title.clone(), chunk_secs, EntryOrigin::Filler, metadata.clone())? {}
        Ok(())
    }

    fn has_room(&self) -> bool {
        self.limit.map_or(true, |limit| self.cursor < limit)
    }

    pub(crate) fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }
}

/// Advance `at` by whole seconds.
pub(crate) fn after(at: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    at + Duration::seconds(secs)
}
