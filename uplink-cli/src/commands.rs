//! One-shot operator commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use uplink_capacity::{
    check_session, derive_mux_rate, mux_rate_tolerance, validate_mux_rate, CapacityError,
    CapacityReport,
};
use uplink_command::{
    export_script, refresh_concat_items, render_script, synthesize, ScriptFormat,
};
use uplink_engine::probe::{probe_item, probe_media, MediaProbe};
use uplink_model::{persist, MuxRateSetting, Session};

use crate::cli::{CalcArgs, ExportFormat, ProbeArgs};
use crate::config::AppConfig;

/// Load a session document and read the concatenation lists it references.
pub fn load_session(path: &Path) -> Result<Session> {
    let mut session = persist::load(path)
        .with_context(|| format!("Failed to load session {}", path.display()))?;
    load_concat_lists(&mut session);
    Ok(session)
}

/// Unreadable lists keep the items recorded in the document.
fn load_concat_lists(session: &mut Session) {
    for service in &mut session.services {
        for input in &mut service.inputs {
            match refresh_concat_items(&mut input.source) {
                Ok(Some(count)) => debug!(service_id = service.id.0, count, "Concat list read"),
                Ok(None) => {}
                Err(e) => warn!(service_id = service.id.0, "Failed to read concat list: {}", e),
            }
        }
    }
}

pub fn save_session(session: &Session, path: &Path) -> Result<()> {
    persist::save(session, path).with_context(|| format!("Failed to save session {}", path.display()))
}

fn print_report(report: &CapacityReport) {
    println!("Derived rate:    {:>12} bps", report.derived_bps);
    println!("Multiplex rate:  {:>12} bps", report.mux_rate_bps);
    println!("Required:        {:>12} bps", report.required_bps);
    println!("Headroom:        {:>12} bps", report.headroom_bps);
}

/// Capacity check that prints the report even when it fails.
fn report_capacity(session: &Session) -> Result<()> {
    match check_session(session) {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(CapacityError::CapacityExceeded { report, .. }) => {
            print_report(&report);
            bail!(
                "Services need {} bps more than the channel carries",
                report.headroom_bps.unsigned_abs()
            )
        }
        Err(e) => Err(e.into()),
    }
}

/// Validate everything a launch would check, without launching.
pub fn check(path: &Path, config: &AppConfig) -> Result<()> {
    let session = load_session(path)?;
    let params = &session.transmission;
    println!(
        "{} {} at {} Bd, output {} Hz",
        params.modulation,
        params.fec,
        params.symbol_rate,
        params.output_frequency_hz()
    );
    report_capacity(&session)?;

    let plan = synthesize(&session, &config.synthesis_context(Utc::now()))
        .context("Session cannot be broadcast")?;
    println!(
        "{} services, {} processes, {} links",
        session.services.len(),
        plan.processes.len(),
        plan.links.len()
    );
    info!(services = session.services.len(), "Session is valid");
    Ok(())
}

/// Derive a multiplex rate and optionally check an entered one.
pub fn calc(args: CalcArgs) -> Result<()> {
    let mut session = match &args.session {
        Some(path) => load_session(path)?,
        None => Session::default(),
    };

    let params = &mut session.transmission;
    if let Some(modulation) = args.modulation {
        params.modulation = modulation;
    }
    if let Some(fec) = args.fec {
        params.fec = fec;
    }
    if let Some(symbol_rate) = args.symbol_rate {
        params.symbol_rate = symbol_rate;
    }
    if args.pilots {
        params.pilots = true;
    }
    if let Some(bps) = args.mux_rate {
        params.mux_rate = MuxRateSetting::Manual { bps };
    }

    let derived = derive_mux_rate(params)?;
    println!(
        "{} {} at {} Bd{}",
        params.modulation,
        params.fec,
        params.symbol_rate,
        if params.pilots { " with pilots" } else { "" }
    );
    println!(
        "Multiplex rate: {derived} bps (tolerance {} bps)",
        mux_rate_tolerance(derived)
    );

    if let Some(entered) = args.mux_rate {
        validate_mux_rate(entered, params)?;
        println!("Entered rate {entered} bps matches");
    }
    if args.session.is_some() {
        report_capacity(&session)?;
    }
    Ok(())
}

fn print_probe(path: &Path, probe: &MediaProbe) {
    let duration = probe
        .duration_secs
        .map(|secs| format!("{secs} s"))
        .unwrap_or_else(|| "unknown".to_string());
    println!("{}: duration {duration}", path.display());
    for (kind, streams) in [
        ("video", &probe.video),
        ("audio", &probe.audio),
        ("subtitle", &probe.subtitles),
    ] {
        for stream in streams {
            println!(
                "  #{} {kind} {} [{}] {}",
                stream.index,
                stream.codec.as_deref().unwrap_or("?"),
                stream.language,
                stream.title.as_deref().unwrap_or("")
            );
        }
    }
}

/// Probe media files, or fill in the durations of a session's media items.
pub fn probe(args: ProbeArgs) -> Result<()> {
    let Some(session_path) = &args.session else {
        let ffprobe = args.ffprobe.unwrap_or_else(|| PathBuf::from("ffprobe"));
        let mut results = Vec::new();
        for path in &args.media {
            let probe = probe_media(&ffprobe, path)
                .with_context(|| format!("Failed to probe {}", path.display()))?;
            if !args.json {
                print_probe(path, &probe);
            }
            results.push(probe);
        }
        if args.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        return Ok(());
    };

    let mut session = load_session(session_path)?;
    let ffprobe = args
        .ffprobe
        .unwrap_or_else(|| session.tools.ffprobe.clone());
    if let Some(id) = args.service {
        if !session.services.iter().any(|s| s.id.0 == id) {
            bail!("Service {id} not found");
        }
    }

    let mut probed = 0;
    let mut failed = 0;
    for service in &mut session.services {
        if args.service.is_some_and(|id| service.id.0 != id) {
            continue;
        }
        for input in &mut service.inputs {
            for item in input.source.media_items_mut() {
                match probe_item(&ffprobe, item) {
                    Ok(probe) => {
                        probed += 1;
                        if !args.json {
                            print_probe(&item.locator, &probe);
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(service_id = service.id.0, "Failed to probe {}: {}", item.locator.display(), e);
                    }
                }
            }
        }
    }

    save_session(&session, session_path)?;
    println!("Probed {probed} media items, {failed} failed");
    Ok(())
}

/// Print the commands a session would run.
pub fn preview(path: &Path, config: &AppConfig) -> Result<()> {
    let session = load_session(path)?;
    let plan = synthesize(&session, &config.synthesis_context(Utc::now()))
        .context("Session cannot be broadcast")?;
    print!("{}", render_script(&plan, ScriptFormat::Plain)?);
    Ok(())
}

/// Script flavour for an output file.
fn format_for(output: &Path, format: Option<ExportFormat>) -> ScriptFormat {
    if let Some(format) = format {
        return format.into();
    }
    match output.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("bat") || ext.eq_ignore_ascii_case("cmd") => {
            ScriptFormat::Batch
        }
        Some(ext) if ext.eq_ignore_ascii_case("txt") => ScriptFormat::Plain,
        _ => ScriptFormat::Posix,
    }
}

/// Write the commands a session would run to a script file.
pub fn export(
    path: &Path,
    output: &Path,
    format: Option<ExportFormat>,
    config: &AppConfig,
) -> Result<()> {
    let session = load_session(path)?;
    let plan = synthesize(&session, &config.synthesis_context(Utc::now()))
        .context("Session cannot be broadcast")?;
    let format = format_for(output, format);
    export_script(&plan, format, output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_model::{Input, InputSource, MediaItem, Service};

    #[test]
    fn test_format_from_extension() {
        assert_eq!(format_for(Path::new("run.sh"), None), ScriptFormat::Posix);
        assert_eq!(format_for(Path::new("RUN.BAT"), None), ScriptFormat::Batch);
        assert_eq!(format_for(Path::new("plan.txt"), None), ScriptFormat::Plain);
        assert_eq!(format_for(Path::new("run"), None), ScriptFormat::Posix);
        assert_eq!(
            format_for(Path::new("run.sh"), Some(ExportFormat::Batch)),
            ScriptFormat::Batch
        );
    }

    #[test]
    fn test_calc_rejects_mismatched_rate() {
        let args = CalcArgs {
            session: None,
            modulation: None,
            fec: None,
            symbol_rate: None,
            pilots: false,
            mux_rate: Some(1_000_000),
        };
        let err = calc(args).unwrap_err();
        assert!(err.downcast_ref::<CapacityError>().is_some());
    }

    #[test]
    fn test_calc_accepts_derived_rate() {
        let derived = derive_mux_rate(&Default::default()).unwrap();
        let args = CalcArgs {
            session: None,
            modulation: None,
            fec: None,
            symbol_rate: None,
            pilots: false,
            mux_rate: Some(derived),
        };
        calc(args).unwrap();
    }

    #[test]
    fn test_empty_session_fails_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save_session(&Session::default(), &path).unwrap();

        let err = check(&path, &AppConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("no services"));
    }

    #[test]
    fn test_loaded_session_records_concat_list_items() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("evening.txt");
        std::fs::write(&list, "file 'a.ts'\nduration 600\nfile 'b.ts'\nduration 1200\n").unwrap();

        let mut session = Session::default();
        let mut service = Service::new(1, "One", "Provider");
        service.inputs.push(Input::new(InputSource::ConcatList {
            list,
            items: Vec::new(),
        }));
        session.add_service(service).unwrap();
        let path = dir.path().join("session.json");
        save_session(&session, &path).unwrap();

        let args = ProbeArgs {
            media: Vec::new(),
            session: Some(path.clone()),
            service: None,
            ffprobe: Some(dir.path().join("missing-ffprobe")),
            json: false,
        };
        probe(args).unwrap();

        let saved = persist::load(&path).unwrap();
        let items = saved.services[0].inputs[0].source.media_items();
        assert_eq!(
            items,
            &[
                MediaItem::with_duration(dir.path().join("a.ts"), 600),
                MediaItem::with_duration(dir.path().join("b.ts"), 1200),
            ]
        );
    }

    #[test]
    fn test_unreadable_concat_list_keeps_recorded_items() {
        let dir = tempfile::tempdir().unwrap();
        let known = vec![MediaItem::with_duration("/media/a.ts", 60)];
        let mut session = Session::default();
        let mut service = Service::new(1, "One", "Provider");
        service.inputs.push(Input::new(InputSource::ConcatList {
            list: dir.path().join("gone.txt"),
            items: known.clone(),
        }));
        session.add_service(service).unwrap();
        let path = dir.path().join("session.json");
        save_session(&session, &path).unwrap();

        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded.services[0].inputs[0].source.media_items(), known.as_slice());
    }

    #[test]
    fn test_missing_session_names_the_file() {
        let err = load_session(Path::new("/nonexistent/session.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/session.json"));
    }
}
