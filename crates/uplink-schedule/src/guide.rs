//! Guide data in the multiplexer's EIT XML format.

use std::fmt::Write;

use chrono::{DateTime, NaiveDateTime, Utc};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use uplink_model::{
    ContentType, EventMetadata, LanguageCode, NetworkIds, ParentalRating, ScheduleEntry, Service,
    ServiceId, Session,
};

use crate::edit::EntryDraft;
use crate::error::ScheduleError;
use crate::ScheduleResult;

/// First event id of every service.
pub const EVENT_ID_BASE: u32 = 10_000;

/// Longest duration an event can carry (99:59:59).
pub const MAX_EVENT_SECS: i64 = 99 * 3600 + 59 * 60 + 59;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render the EIT XML document for every service with a schedule.
///
/// `now` decides which entry is marked as running.
pub fn render_eit_xml(session: &Session, now: DateTime<Utc>) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<tsduck>\n");
    for service in session.services.iter().filter(|s| !s.epg.entries.is_empty()) {
        push_service(&mut xml, service, &session.transmission.network, now);
    }
    xml.push_str("</tsduck>\n");
    xml
}

/// Returns true if any service has guide entries.
pub fn has_guide_data(session: &Session) -> bool {
    session.services.iter().any(|s| !s.epg.entries.is_empty())
}

fn push_service(xml: &mut String, service: &Service, network: &NetworkIds, now: DateTime<Utc>) {
    let _ = writeln!(
        xml,
        "  <EIT type=\"pf\" version=\"0\" actual=\"true\" service_id=\"0x{:04X}\" \
         transport_stream_id=\"0x{:04X}\" original_network_id=\"0x{:04X}\" last_table_id=\"0x4E\">",
        service.id.0, network.transport_stream_id, network.original_network_id
    );
    let mut event_id = EVENT_ID_BASE;
    for entry in &service.epg.entries {
        // Longer entries go out as consecutive events.
        let mut start = entry.start;
        let mut left = entry.duration_secs.max(0);
        loop {
            let secs = left.min(MAX_EVENT_SECS);
            let end = start + chrono::Duration::seconds(secs);
            let running = start <= now && now < end;
            push_event(xml, entry, event_id & 0xFFFF, start, secs, running);
            event_id = event_id.wrapping_add(1);
            left -= secs;
            start = end;
            if left <= 0 {
                break;
            }
        }
    }
    xml.push_str("  </EIT>\n");
}

fn push_event(
    xml: &mut String,
    entry: &ScheduleEntry,
    event_id: u32,
    start: DateTime<Utc>,
    secs: i64,
    running: bool,
) {
    let metadata = &entry.metadata;
    let language = metadata.language.as_str();

    let _ = writeln!(
        xml,
        "    <event event_id=\"{}\" start_time=\"{}\" duration=\"{:02}:{:02}:{:02}\" \
         running_status=\"{}\" CA_mode=\"false\">",
        event_id,
        start.format(TIME_FORMAT),
        secs / 3600,
        secs % 3600 / 60,
        secs % 60,
        if running { "running" } else { "not-running" },
    );
    let _ = writeln!(
        xml,
        "      <content_descriptor>\n        <content content_nibble_level_1=\"{}\" \
         content_nibble_level_2=\"{}\" user_byte=\"0x00\"/>\n      </content_descriptor>",
        metadata.content.level1, metadata.content.level2
    );
    let _ = writeln!(
        xml,
        "      <short_event_descriptor language_code=\"{}\">\n        <event_name>{}</event_name>\n        \
         <text>{}</text>\n      </short_event_descriptor>",
        language,
        escape(&entry.title),
        escape(&metadata.short_description)
    );
    if let Some(rating) = &metadata.rating {
        if let Some(value) = rating.dvb_rating() {
            let _ = writeln!(
                xml,
                "      <parental_rating_descriptor>\n        <country country_code=\"{}\" \
                 rating=\"0x{:02X}\"/>\n      </parental_rating_descriptor>",
                escape(&rating.country),
                value
            );
        }
    }
    if !metadata.extended_description.is_empty() {
        let _ = writeln!(
            xml,
            "      <extended_event_descriptor descriptor_number=\"0\" last_descriptor_number=\"0\" \
             language_code=\"{}\">\n        <text>{}</text>\n      </extended_event_descriptor>",
            language,
            escape(&metadata.extended_description)
        );
    }
    xml.push_str("    </event>\n");
}

/// One event read from a guide document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideEvent {
    pub service: ServiceId,
    pub draft: EntryDraft,
}

/// Parse an EIT XML document back into events, in document order.
///
/// Events with unreadable times are skipped with a warning; a document that is
/// not XML or has no `<tsduck>` root is an error.
pub fn parse_eit_xml(xml: &str) -> ScheduleResult<Vec<GuideEvent>> {
    let doc = Document::parse(xml).map_err(|e| ScheduleError::MalformedGuide(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "tsduck" {
        return Err(ScheduleError::MalformedGuide(format!(
            "root element is <{}>, expected <tsduck>",
            root.tag_name().name()
        )));
    }

    let mut events = Vec::new();
    for table in elements(root, "EIT") {
        let Some(service) = table.attribute("service_id").and_then(parse_number) else {
            warn!("Skipping EIT table without a usable service_id");
            continue;
        };
        let Ok(service) = u16::try_from(service) else {
            warn!(service, "Skipping EIT table with out of range service_id");
            continue;
        };
        for node in elements(table, "event") {
            match parse_event(node) {
                Ok(draft) => events.push(GuideEvent {
                    service: ServiceId(service),
                    draft,
                }),
                Err(reason) => warn!(service_id = service, "Skipping malformed event: {}", reason),
            }
        }
    }
    debug!(events = events.len(), "Guide data parsed");
    Ok(events)
}

fn elements<'a, 'input: 'a>(
    parent: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    parent
        .children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child<'a, 'input>(parent: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    parent
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(parent: Node<'_, '_>, name: &str) -> String {
    child(parent, name)
        .and_then(|n| n.text())
        .unwrap_or_default()
        .to_string()
}

/// Decimal or `0x` hexadecimal.
fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// `hh:mm:ss` to seconds.
fn parse_duration(text: &str) -> Option<i64> {
    let mut parts = text.trim().split(':').map(|p| p.parse::<i64>().ok());
    let (h, m, s) = (parts.next()??, parts.next()??, parts.next()??);
    if parts.next().is_some() || !(0..60).contains(&m) || !(0..60).contains(&s) || h < 0 {
        return None;
    }
    Some(h * 3600 + m * 60 + s)
}

fn parse_event(node: Node<'_, '_>) -> Result<EntryDraft, String> {
    let start_text = node.attribute("start_time").ok_or("no start_time")?;
    let start = NaiveDateTime::parse_from_str(start_text.trim(), TIME_FORMAT)
        .map_err(|e| format!("start_time {start_text:?}: {e}"))?
        .and_utc();
    let duration_text = node.attribute("duration").ok_or("no duration")?;
    let duration_secs =
        parse_duration(duration_text).ok_or_else(|| format!("duration {duration_text:?}"))?;

    let mut metadata = EventMetadata::default();
    let mut title = String::new();
    if let Some(short) = child(node, "short_event_descriptor") {
        title = child_text(short, "event_name");
        metadata.short_description = child_text(short, "text");
        if let Some(code) = short.attribute("language_code") {
            metadata.language = code.parse().unwrap_or_else(|_| LanguageCode::english());
        }
    }
    if let Some(extended) = child(node, "extended_event_descriptor") {
        metadata.extended_description = child_text(extended, "text");
    }
    if let Some(content) = child(node, "content_descriptor").and_then(|d| child(d, "content")) {
        let nibble = |name: &str, default: u8| {
            content
                .attribute(name)
                .and_then(parse_number)
                .and_then(|v| u8::try_from(v).ok())
                .unwrap_or(default)
        };
        metadata.content = ContentType {
            level1: nibble("content_nibble_level_1", ContentType::UNDEFINED.level1),
            level2: nibble("content_nibble_level_2", ContentType::UNDEFINED.level2),
        };
    }
    if let Some(country) =
        child(node, "parental_rating_descriptor").and_then(|d| child(d, "country"))
    {
        let rating = country.attribute("rating").and_then(parse_number);
        if let (Some(code), Some(rating @ 1..=15)) = (country.attribute("country_code"), rating) {
            metadata.rating = Some(ParentalRating {
                country: code.to_string(),
                min_age: rating as u8 + 3,
            });
        }
    }

    Ok(EntryDraft {
        title,
        start,
        duration_secs,
        metadata,
    })
}

/// Escape text for XML content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && !matches!(c, '\n' | '\t') => {}
            c => out.push(c),
        }
    }
    out
}
