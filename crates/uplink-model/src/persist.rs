//! Session documents on disk.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::ModelError;
use crate::session::Session;
use crate::ModelResult;

/// Version written into every session document.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionDocument {
    format_version: u32,
    session: Session,
}

/// Serialize a session to a JSON document.
pub fn to_json(session: &Session) -> ModelResult<String> {
    let document = SessionDocument {
        format_version: FORMAT_VERSION,
        session: session.clone(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Parse and validate a JSON session document.
pub fn from_json(text: &str) -> ModelResult<Session> {
    let document: SessionDocument = serde_json::from_str(text)?;
    if document.format_version != FORMAT_VERSION {
        return Err(ModelError::UnsupportedFormatVersion(document.format_version));
    }
    document.session.validate()?;
    Ok(document.session)
}

/// Write a session document.
#[instrument(name = "save_session", skip(session))]
pub fn save(session: &Session, path: &Path) -> ModelResult<()> {
    let json = to_json(session)?;
    fs::write(path, json)?;
    info!(services = session.services.len(), "Session saved");
    Ok(())
}

/// Read a session document.
#[instrument(name = "load_session")]
pub fn load(path: &Path) -> ModelResult<Session> {
    let text = fs::read_to_string(path)?;
    let session = from_json(&text)?;
    debug!(services = session.services.len(), "Session loaded");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{AudioCodec, FrameRate, PixelFormat, Preset, VideoCodec, VideoFormat};
    use crate::epg::{EntryId, EntryOrigin, EventMetadata, ParentalRating, ScheduleEntry};
    use crate::input::{AudioTrack, Input, InputSource, MediaItem, StreamSelector, SubtitleMode};
    use crate::service::{Service, ServiceType};
    use crate::transmission::{FecRate, Modulation, MuxRateSetting};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    #[derive(Debug, Clone)]
    struct ArbSession(Session);

    fn pick<T: Copy>(g: &mut Gen, items: &[T]) -> T {
        *g.choose(items).unwrap()
    }

    fn arbitrary_service(g: &mut Gen, id: u16) -> Service {
        let mut service = Service::new(id, format!("Service {id}"), "Provider");
        service.service_type = pick(g, &[ServiceType::Tv, ServiceType::Radio]);
        service.looping = bool::arbitrary(g);

        let codec = pick(g, &VideoCodec::ALL);
        service.encoding.video.codec = codec;
        service.encoding.video.preset = pick(g, codec.family().presets());
        service.encoding.video.bitrate_kbps = u32::arbitrary(g) % 20_000 + 500;
        service.encoding.video.pixel_format = pick(g, &PixelFormat::ALL);
        service.encoding.video.format = pick(g, &VideoFormat::SUPPORTED);
        let audio = pick(g, &AudioCodec::ALL);
        service.encoding.audio.codec = audio;
        service.encoding.audio.bitrate_kbps = pick(g, audio.bitrates_kbps());
        service.encoding.audio.sample_rate = pick(g, audio.sample_rates());
        service.encoding.audio.loudnorm = bool::arbitrary(g);

        let items: Vec<MediaItem> = (0..u8::arbitrary(g) % 4 + 1)
            .map(|i| MediaItem::with_duration(format!("/media/{id}_{i}.ts"), u64::from(i) * 60 + 1))
            .collect();
        let mut input = Input::new(InputSource::Playlist { items });
        input.audio_tracks.push(AudioTrack {
            stream: StreamSelector::Index(u32::arbitrary(g) % 8),
            language: "fre".parse().unwrap(),
        });
        if service.service_type == ServiceType::Tv && bool::arbitrary(g) {
            input.subtitles = SubtitleMode::Embedded { stream: 2 };
        }
        service.inputs.push(input);

        let base = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        let mut start = base;
        for n in 0..u32::arbitrary(g) % 6 {
            let duration_secs = i64::from(u16::arbitrary(g)) + 1;
            let entry = ScheduleEntry {
                id: EntryId(n),
                title: format!("Show {n} & \"friends\""),
                start,
                duration_secs,
                origin: pick(g, &[EntryOrigin::Manual, EntryOrigin::Generated, EntryOrigin::Filler]),
                metadata: EventMetadata {
                    short_description: String::arbitrary(g),
                    rating: bool::arbitrary(g).then(|| ParentalRating {
                        country: "gbr".to_string(),
                        min_age: 12,
                    }),
                    ..Default::default()
                },
            };
            start = entry.end();
            service.epg.entries.push(entry);
        }
        service.epg.next_id = service.epg.entries.len() as u32;
        service
    }

    impl Arbitrary for ArbSession {
        fn arbitrary(g: &mut Gen) -> Self {
            let mut session = Session::default();
            for id in 1..=u16::from(u8::arbitrary(g) % 5) {
                session.services.push(arbitrary_service(g, id));
            }
            session.transmission.modulation = pick(g, &Modulation::ALL);
            session.transmission.fec = pick(g, session.transmission.modulation.fec_rates());
            session.transmission.mux_rate = if bool::arbitrary(g) {
                MuxRateSetting::Auto
            } else {
                MuxRateSetting::Manual {
                    bps: u64::from(u32::arbitrary(g)) + 1,
                }
            };
            ArbSession(session)
        }
    }

    #[quickcheck]
    fn prop_json_round_trip(session: ArbSession) -> bool {
        let json = to_json(&session.0).unwrap();
        from_json(&json).unwrap() == session.0
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = Session::default();
        let mut service = Service::new(1, "News", "Uplink");
        service.encoding.video.format = VideoFormat {
            frame_rate: FrameRate::Pal,
            ..VideoFormat::default()
        };
        service
            .inputs
            .push(Input::file(MediaItem::with_duration("/media/news.ts", 1800)));
        service.encoding.video.preset = Preset::Slow;
        session.add_service(service).unwrap();
        session.transmission.fec = FecRate::R2_3;

        save(&session, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let text = r#"{"format_version": 1, "session": {"services": [], "colour": "red"}}"#;
        assert!(matches!(from_json(text), Err(ModelError::Json(_))));
    }

    #[test]
    fn test_future_versions_are_rejected() {
        let text = r#"{"format_version": 7, "session": {}}"#;
        assert!(matches!(
            from_json(text),
            Err(ModelError::UnsupportedFormatVersion(7))
        ));
    }

    #[test]
    fn test_invalid_session_is_rejected_on_load() {
        let mut session = Session::default();
        session.services.push(Service::new(1, "A", "P"));
        session.services.push(Service::new(1, "B", "P"));
        let json = to_json(&session).unwrap();
        assert!(matches!(
            from_json(&json),
            Err(ModelError::DuplicateServiceId(1))
        ));
    }
}
