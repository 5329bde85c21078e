//! Session snapshot to launch plan.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use uplink_capacity::check_session;
use uplink_ipc::{
    AuxFile, DataLink, Invocation, LaunchPlan, LinkProtocol, LinkTransport, ProcessId,
    ProcessRole, ProcessSpec,
};
use uplink_model::{InputSource, MediaItem, Service, Session};
use uplink_schedule::{has_guide_data, render_eit_xml, ScheduleEngine};

use crate::concat::render_concat_list;
use crate::encoder::{EncoderInput, EncoderOptionsBuilder, EncoderOutput};
use crate::error::SynthesisError;
use crate::multiplexer::{time_signal_args, MultiplexerOptionsBuilder};

/// Guide data file name inside the working directory.
pub const GUIDE_FILE_NAME: &str = "eit.xml";

/// Analysis report file name used when the session names none.
pub const ANALYSIS_FILE_NAME: &str = "analysis.txt";

/// Default first loopback port for secondary encoders.
pub const DEFAULT_PORT_BASE: u16 = 31_000;

/// Everything synthesis needs besides the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisContext {
    /// Decides which guide entry is marked running.
    pub now: DateTime<Utc>,

    /// Where auxiliary files will be written.
    pub work_dir: PathBuf,

    /// Secondary encoder `n` sends to `port_base + n`.
    pub port_base: u16,
}

impl SynthesisContext {
    pub fn new(now: DateTime<Utc>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            now,
            work_dir: work_dir.into(),
            port_base: DEFAULT_PORT_BASE,
        }
    }
}

/// Turn a session into a launch plan.
///
/// Capacity and schedules are checked first; a failing check returns before
/// any command is built. Identical inputs give identical plans.
#[instrument(name = "synthesize", skip(session, context), fields(services = session.services.len()))]
pub fn synthesize(
    session: &Session,
    context: &SynthesisContext,
) -> Result<LaunchPlan, SynthesisError> {
    if session.services.is_empty() {
        return Err(SynthesisError::NoServices);
    }
    session.validate()?;
    for service in &session.services {
        ScheduleEngine::verify(&service.epg).map_err(|source| SynthesisError::Schedule {
            service: service.id.0,
            source,
        })?;
    }
    let capacity = check_session(session)?;

    let mut processes = Vec::with_capacity(session.services.len() + 2);
    let mut files = Vec::new();
    let mut merged = Vec::new();

    for (index, service) in session.services.iter().enumerate() {
        let input = encoder_input(service, &context.work_dir, &mut files)?;
        let output = if index == 0 {
            EncoderOutput::Pipe
        } else {
            let endpoint = loopback_endpoint(context.port_base, index)
                .ok_or(SynthesisError::PortOutOfRange {
                    service: service.id.0,
                })?;
            merged.push(endpoint);
            EncoderOutput::Udp(endpoint)
        };

        let args = EncoderOptionsBuilder::new(
            service,
            &input,
            output,
            &session.transmission.network,
            index,
        )
        .build();
        debug!(service_id = service.id.0, ?output, "Encoder command built");

        processes.push(ProcessSpec {
            role: ProcessRole::Encoder {
                service_id: service.id.0,
                service_name: service.name.clone(),
            },
            invocation: Invocation {
                program: session.tools.ffmpeg.clone(),
                args,
            },
        });
    }

    let time_signal_endpoint = session.time_signal.endpoint();
    let time_signal = ProcessId(processes.len());
    processes.push(ProcessSpec {
        role: ProcessRole::TimeSignal,
        invocation: Invocation {
            program: session.tools.tdt.clone(),
            args: time_signal_args(time_signal_endpoint),
        },
    });

    let guide = if has_guide_data(session) {
        let path = context.work_dir.join(GUIDE_FILE_NAME);
        files.push(AuxFile {
            path: path.clone(),
            contents: render_eit_xml(session, context.now),
        });
        Some(path)
    } else {
        None
    };
    let analysis_report = session
        .analysis_report
        .clone()
        .unwrap_or_else(|| context.work_dir.join(ANALYSIS_FILE_NAME));

    let multiplexer = ProcessId(processes.len());
    processes.push(ProcessSpec {
        role: ProcessRole::Multiplexer,
        invocation: Invocation {
            program: session.tools.tsp.clone(),
            args: MultiplexerOptionsBuilder {
                tsp: &session.tools.tsp,
                mux_rate_bps: capacity.mux_rate_bps,
                merged: &merged,
                time_signal: time_signal_endpoint,
                analysis_report: &analysis_report,
                guide: guide.as_deref(),
                transmission: &session.transmission,
            }
            .build(),
        },
    });

    let mut links = vec![DataLink {
        from: ProcessId(0),
        to: multiplexer,
        transport: LinkTransport::Pipe,
    }];
    links.extend(merged.iter().enumerate().map(|(i, endpoint)| DataLink {
        from: ProcessId(i + 1),
        to: multiplexer,
        transport: LinkTransport::Loopback {
            endpoint: *endpoint,
            protocol: LinkProtocol::Udp,
        },
    }));
    links.push(DataLink {
        from: time_signal,
        to: multiplexer,
        transport: LinkTransport::Loopback {
            endpoint: time_signal_endpoint,
            protocol: LinkProtocol::Tcp,
        },
    });

    let plan = LaunchPlan {
        processes,
        links,
        files,
        mux_rate_bps: capacity.mux_rate_bps,
    };
    plan.validate()?;

    info!(
        processes = plan.processes.len(),
        files = plan.files.len(),
        mux_rate_bps = plan.mux_rate_bps,
        "Launch plan synthesized"
    );
    Ok(plan)
}

/// Concatenation list written for a service's playlist.
pub fn playlist_path(work_dir: &Path, service: &Service) -> PathBuf {
    work_dir.join(format!("service-{}-playlist.txt", service.id.0))
}

fn loopback_endpoint(port_base: u16, index: usize) -> Option<SocketAddr> {
    let port = u16::try_from(usize::from(port_base).checked_add(index)?).ok()?;
    Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
}

/// Decide what the encoder reads, adding a playlist file when one is needed.
fn encoder_input(
    service: &Service,
    work_dir: &Path,
    files: &mut Vec<AuxFile>,
) -> Result<EncoderInput, SynthesisError> {
    let id = service.id.0;
    let first = service
        .inputs
        .first()
        .ok_or(SynthesisError::NoInput { service: id })?;
    if first.audio_tracks.is_empty() {
        return Err(SynthesisError::NoAudio { service: id });
    }

    let mut playlist = |items: Vec<MediaItem>| {
        let path = playlist_path(work_dir, service);
        files.push(AuxFile {
            path: path.clone(),
            contents: render_concat_list(&items),
        });
        EncoderInput::ConcatList(path)
    };

    if let [input] = service.inputs.as_slice() {
        return Ok(match &input.source {
            InputSource::File { item } => EncoderInput::File(item.locator.clone()),
            InputSource::ConcatList { list, .. } => EncoderInput::ConcatList(list.clone()),
            InputSource::Playlist { items } => playlist(items.clone()),
            InputSource::NetworkStream { url } => EncoderInput::Network(url.clone()),
        });
    }

    let mut items = Vec::new();
    for input in &service.inputs {
        if input.source.is_live() {
            return Err(SynthesisError::MixedInputs { service: id });
        }
        if input.audio_tracks != first.audio_tracks || input.subtitles != first.subtitles {
            return Err(SynthesisError::InconsistentTracks { service: id });
        }
        if let InputSource::ConcatList { list, items: known } = &input.source {
            if known.is_empty() {
                return Err(SynthesisError::UnknownConcatItems {
                    service: id,
                    list: list.clone(),
                });
            }
        }
        items.extend(input.source.media_items().iter().cloned());
    }
    Ok(playlist(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use uplink_capacity::CapacityError;
    use uplink_model::{
        EntryId, EntryOrigin, EventMetadata, FecRate, Input, Modulation, ScheduleEntry,
        ServiceId, SubtitleMode, TransmissionParameters,
    };
    use url::Url;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap()
    }

    fn context() -> SynthesisContext {
        SynthesisContext::new(now(), "/work")
    }

    fn service(id: u16, file: &str) -> Service {
        let mut service = Service::new(id, format!("Service {id}"), "Uplink");
        service.inputs.push(Input::file(MediaItem::with_duration(file, 1800)));
        service
    }

    fn sample_session(count: u16) -> Session {
        let mut session = Session::default();
        for id in 1..=count {
            session
                .add_service(service(id, &format!("/media/{id}.ts")))
                .unwrap();
        }
        session
    }

    #[test]
    fn test_three_services_plan_shape() {
        let plan = synthesize(&sample_session(3), &context()).unwrap();

        let roles: Vec<String> = plan.processes.iter().map(|p| p.role.tag()).collect();
        assert_eq!(
            roles,
            vec!["encoder:1", "encoder:2", "encoder:3", "time-signal", "multiplexer"]
        );
        assert_eq!(plan.mux_rate_bps, 38_014_705);

        assert_eq!(plan.pipe_source(ProcessId(4)), Some(ProcessId(0)));
        let endpoints: Vec<SocketAddr> = plan
            .links
            .iter()
            .filter_map(|link| match link.transport {
                LinkTransport::Loopback { endpoint, .. } => Some(endpoint),
                LinkTransport::Pipe => None,
            })
            .collect();
        assert_eq!(
            endpoints,
            vec![
                "127.0.0.1:31001".parse::<SocketAddr>().unwrap(),
                "127.0.0.1:31002".parse().unwrap(),
                "127.0.0.1:32000".parse().unwrap(),
            ]
        );

        let encoder = &plan.processes[1].invocation;
        assert_eq!(encoder.program, PathBuf::from("ffmpeg"));
        assert_eq!(encoder.args.last().unwrap(), "udp://127.0.0.1:31001?pkt_size=1316");

        let mux = &plan.processes[4].invocation.args;
        assert_eq!(mux.iter().filter(|a| *a == "merge").count(), 2);
        assert!(mux.contains(&"/work/analysis.txt".to_string()));
        assert!(!mux.contains(&"eitinject".to_string()));
        assert!(plan.files.is_empty());
        assert_eq!(plan.launch_order().unwrap().last(), Some(&ProcessId(4)));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let mut session = sample_session(2);
        session.services[0].epg.entries.push(ScheduleEntry {
            id: EntryId(0),
            title: "Film".to_string(),
            start: now(),
            duration_secs: 3600,
            origin: EntryOrigin::Manual,
            metadata: EventMetadata::default(),
        });
        assert_eq!(
            synthesize(&session, &context()).unwrap(),
            synthesize(&session, &context()).unwrap()
        );
    }

    #[test]
    fn test_guide_file_is_planned() {
        let mut session = sample_session(1);
        session.services[0].epg.entries.push(ScheduleEntry {
            id: EntryId(0),
            title: "Film".to_string(),
            start: now() - Duration::minutes(5),
            duration_secs: 3600,
            origin: EntryOrigin::Manual,
            metadata: EventMetadata::default(),
        });
        let plan = synthesize(&session, &context()).unwrap();

        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].path, PathBuf::from("/work/eit.xml"));
        assert!(plan.files[0].contents.contains("running_status=\"running\""));
        assert!(plan.processes[2]
            .invocation
            .args
            .windows(2)
            .any(|w| w == ["-f", "/work/eit.xml"]));
    }

    #[test]
    fn test_playlist_becomes_concat_file() {
        let mut session = Session::default();
        let mut service = Service::new(5, "Films", "Uplink");
        service.looping = true;
        service.inputs.push(Input::new(InputSource::Playlist {
            items: vec![MediaItem::new("/media/a.ts"), MediaItem::new("/media/b.ts")],
        }));
        session.add_service(service).unwrap();

        let plan = synthesize(&session, &context()).unwrap();
        assert_eq!(
            plan.files[0],
            AuxFile {
                path: "/work/service-5-playlist.txt".into(),
                contents: "file '/media/a.ts'\nfile '/media/b.ts'\n".to_string(),
            }
        );
        assert!(plan.processes[0]
            .invocation
            .args
            .contains(&"/work/service-5-playlist.txt".to_string()));
    }

    #[test]
    fn test_multiple_inputs_are_combined() {
        let mut session = Session::default();
        let mut service = service(1, "/media/a.ts");
        service.inputs.push(Input::file(MediaItem::new("/media/b.ts")));
        session.add_service(service).unwrap();

        let plan = synthesize(&session, &context()).unwrap();
        assert_eq!(
            plan.files[0].contents,
            "file '/media/a.ts'\nfile '/media/b.ts'\n"
        );
    }

    #[test]
    fn test_input_errors() {
        let mut session = sample_session(1);
        session.services[0].inputs[0].audio_tracks.clear();
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::NoAudio { service: 1 })
        ));

        let mut session = session_with_second_input(Input::new(InputSource::NetworkStream {
            url: Url::parse("udp://239.0.0.1:5000").unwrap(),
        }));
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::MixedInputs { service: 1 })
        ));

        let mut second = Input::file(MediaItem::new("/media/b.ts"));
        second.subtitles = SubtitleMode::Embedded { stream: 3 };
        session = session_with_second_input(second);
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::InconsistentTracks { service: 1 })
        ));

        session = session_with_second_input(Input::new(InputSource::ConcatList {
            list: "/lists/evening.txt".into(),
            items: Vec::new(),
        }));
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::UnknownConcatItems { .. })
        ));

        let mut session = sample_session(1);
        session.services[0].inputs.clear();
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::NoInput { service: 1 })
        ));

        assert!(matches!(
            synthesize(&Session::default(), &context()),
            Err(SynthesisError::NoServices)
        ));
    }

    fn session_with_second_input(input: Input) -> Session {
        let mut session = sample_session(1);
        session.services[0].inputs.push(input);
        session
    }

    #[test]
    fn test_capacity_gate() {
        let mut session = sample_session(2);
        session.transmission = TransmissionParameters {
            modulation: Modulation::DvbsQpsk,
            fec: FecRate::R1_2,
            symbol_rate: 12_000_000,
            ..Default::default()
        };
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::Capacity(CapacityError::CapacityExceeded { .. }))
        ));
    }

    #[test]
    fn test_invalid_schedule_blocks_synthesis() {
        let mut session = sample_session(1);
        let entry = |id, start_secs| ScheduleEntry {
            id: EntryId(id),
            title: format!("E{id}"),
            start: now() + Duration::seconds(start_secs),
            duration_secs: 600,
            origin: EntryOrigin::Manual,
            metadata: EventMetadata::default(),
        };
        session.services[0].epg.entries = vec![entry(0, 0), entry(1, 300)];
        assert!(matches!(
            synthesize(&session, &context()),
            Err(SynthesisError::Schedule { service: 1, .. })
        ));
        assert!(session.service(ServiceId(1)).is_some());
    }

    #[test]
    fn test_port_overflow() {
        let mut context = context();
        context.port_base = u16::MAX;
        assert!(matches!(
            synthesize(&sample_session(2), &context),
            Err(SynthesisError::PortOutOfRange { service: 2 })
        ));
    }
}
