//! Schedule editing on session documents.

use std::fs;
use std::path::Path;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use uplink_model::{EntryId, EntryOrigin, EventMetadata, ServiceId, Session, SessionStore};
use uplink_schedule::{
    parse_eit_xml, render_eit_xml, EntryDraft, EpgEdit, ScheduleEngine, ScheduleError,
};

use crate::cli::{EpgCommand, ServiceTarget};
use crate::commands::{load_session, save_session};

pub fn execute(command: EpgCommand) -> Result<()> {
    match command {
        EpgCommand::Generate {
            target,
            start,
            hours,
        } => generate(&target, start, hours),
        EpgCommand::Fill {
            target,
            from,
            until,
        } => {
            let change = match from {
                Some(start) => EpgEdit::Cover { start, end: until },
                None => EpgEdit::SetHorizon(Some(until)),
            };
            edit(&target, change)?;
            println!("Schedule of service {} now runs to {until}", target.service);
            Ok(())
        }
        EpgCommand::Import {
            session,
            guide,
            service,
        } => import(&session, &guide, service.map(ServiceId)),
        EpgCommand::Add {
            target,
            title,
            start,
            duration,
            short,
            extended,
            language,
        } => {
            let draft = EntryDraft {
                title,
                start,
                duration_secs: duration,
                metadata: EventMetadata {
                    short_description: short,
                    extended_description: extended,
                    language,
                    ..Default::default()
                },
            };
            report_touched(edit(&target, EpgEdit::Insert(draft))?, "Added");
            Ok(())
        }
        EpgCommand::Delete { target, entry } => {
            edit(&target, EpgEdit::Delete(EntryId(entry)))?;
            println!("Deleted entry {}", EntryId(entry));
            Ok(())
        }
        EpgCommand::Duplicate { target, entry } => {
            report_touched(edit(&target, EpgEdit::Duplicate(EntryId(entry)))?, "Created");
            Ok(())
        }
        EpgCommand::List { session, service } => {
            let session = load_session(&session)?;
            list(&session, service.map(ServiceId));
            Ok(())
        }
        EpgCommand::Export { session, output, at } => {
            export(&load_session(&session)?, output.as_deref(), at)
        }
    }
}

fn report_touched(touched: Option<EntryId>, verb: &str) {
    if let Some(id) = touched {
        println!("{verb} entry {id}");
    }
}

/// Apply one edit and write the session back. Nothing is written when the edit is rejected.
fn edit(target: &ServiceTarget, change: EpgEdit) -> Result<Option<EntryId>> {
    let store = SessionStore::new(load_session(&target.session)?);
    let engine = ScheduleEngine::for_session(&store.snapshot());
    let service = ServiceId(target.service);

    let touched = store
        .update(|session| engine.edit_service(session, service, change))
        .with_context(|| format!("Schedule edit on service {service} rejected"))?;
    save_session(&store.snapshot(), &target.session)?;
    info!(service_id = target.service, version = store.version(), "Schedule saved");
    Ok(touched)
}

fn generate(target: &ServiceTarget, start: DateTime<Utc>, hours: u32) -> Result<()> {
    let store = SessionStore::new(load_session(&target.session)?);
    let engine = ScheduleEngine::for_session(&store.snapshot());
    let service = ServiceId(target.service);
    let horizon_end = start + Duration::hours(i64::from(hours));

    let count = store
        .update(|session| engine.regenerate_service(session, service, start, horizon_end))
        .with_context(|| format!("Failed to generate schedule for service {service}"))?;
    save_session(&store.snapshot(), &target.session)?;
    println!("Service {service}: {count} entries from {start} to {horizon_end}");
    Ok(())
}

/// Merge an EIT XML file into the session. Either every service takes its
/// events or nothing is written.
fn import(path: &Path, guide: &Path, only: Option<ServiceId>) -> Result<()> {
    let xml = fs::read_to_string(guide)
        .with_context(|| format!("Failed to read {}", guide.display()))?;
    let events = parse_eit_xml(&xml)
        .with_context(|| format!("Failed to parse {}", guide.display()))?;

    let store = SessionStore::new(load_session(path)?);
    let snapshot = store.snapshot();
    let mut by_service: BTreeMap<ServiceId, Vec<EntryDraft>> = BTreeMap::new();
    for event in events {
        if only.is_some_and(|id| id != event.service) {
            continue;
        }
        if snapshot.service(event.service).is_none() {
            warn!(service_id = event.service.0, "Skipping event for unknown service");
            continue;
        }
        by_service.entry(event.service).or_default().push(event.draft);
    }

    let engine = ScheduleEngine::for_session(&snapshot);
    let counts: Vec<(ServiceId, usize)> = by_service
        .iter()
        .map(|(id, drafts)| (*id, drafts.len()))
        .collect();
    store
        .update(|session| {
            for (id, drafts) in by_service {
                engine.edit_service(session, id, EpgEdit::Import(drafts))?;
            }
            Ok::<_, ScheduleError>(())
        })
        .with_context(|| format!("Guide data in {} rejected", guide.display()))?;
    save_session(&store.snapshot(), path)?;

    for (id, count) in &counts {
        println!("Service {id}: imported {count} events");
    }
    info!(services = counts.len(), version = store.version(), "Guide imported");
    Ok(())
}

fn origin_name(origin: EntryOrigin) -> &'static str {
    match origin {
        EntryOrigin::Manual => "manual",
        EntryOrigin::Generated => "generated",
        EntryOrigin::Filler => "filler",
    }
}

fn list(session: &Session, only: Option<ServiceId>) {
    for service in session
        .services
        .iter()
        .filter(|s| only.map_or(true, |id| s.id == id))
    {
        println!("Service {} ({})", service.id, service.name);
        for entry in &service.epg.entries {
            println!(
                "  {:>6} {} - {} {:<9} {}",
                entry.id.to_string(),
                entry.start.format("%Y-%m-%d %H:%M:%S"),
                entry.end().format("%H:%M:%S"),
                origin_name(entry.origin),
                entry.title
            );
        }
        match (service.epg.horizon_start, service.epg.horizon_end) {
            (Some(start), Some(end)) => println!("  horizon {start} to {end}"),
            (None, Some(end)) => println!("  horizon ends {end}"),
            _ => {}
        }
    }
}

fn export(session: &Session, output: Option<&Path>, at: DateTime<Utc>) -> Result<()> {
    let xml = render_eit_xml(session, at);
    match output {
        Some(path) => {
            fs::write(path, xml).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Guide exported");
        }
        None => print!("{xml}"),
    }
    Ok(())
}
