use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use uplink_command::ScriptFormat;
use uplink_model::{FecRate, LanguageCode, Modulation};

/// uplink - DVB-S/S2 broadcast orchestrator
#[derive(Parser, Debug)]
#[command(name = "uplink", author, version, about, long_about = None)]
pub struct Args {
    /// Runtime settings file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a session: services, schedules, capacity and commands
    Check {
        /// Session document
        session: PathBuf,
    },

    /// Compute the multiplex rate of a transmission setup
    Calc(CalcArgs),

    /// Edit or export programme schedules
    Epg {
        #[command(subcommand)]
        command: EpgCommand,
    },

    /// Inspect media files with ffprobe
    Probe(ProbeArgs),

    /// Print the commands a session would run
    Preview {
        /// Session document
        session: PathBuf,
    },

    /// Write the commands a session would run to a script
    Export {
        /// Session document
        session: PathBuf,

        /// Script file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Script flavour; guessed from the output extension when omitted
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },

    /// Broadcast a session until stopped or failed
    Run {
        /// Session document
        session: PathBuf,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[derive(clap::Args, Debug)]
pub struct CalcArgs {
    /// Session whose transmission parameters are the starting point
    pub session: Option<PathBuf>,

    /// Modulation, e.g. DVB-S2-8PSK
    #[arg(long, value_parser = parse_modulation)]
    pub modulation: Option<Modulation>,

    /// FEC code rate, e.g. 3/4
    #[arg(long, value_parser = parse_fec)]
    pub fec: Option<FecRate>,

    /// Symbol rate in baud
    #[arg(long)]
    pub symbol_rate: Option<u32>,

    /// DVB-S2 pilot symbols
    #[arg(long)]
    pub pilots: bool,

    /// Entered multiplex rate to check against the derived one
    #[arg(long)]
    pub mux_rate: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct ProbeArgs {
    /// Media files to inspect
    #[arg(required_unless_present = "session")]
    pub media: Vec<PathBuf>,

    /// Record probed durations in this session document instead
    #[arg(long, conflicts_with = "media")]
    pub session: Option<PathBuf>,

    /// Only probe this service's inputs
    #[arg(long, requires = "session")]
    pub service: Option<u16>,

    /// ffprobe binary; defaults to the session's tool path or `ffprobe`
    #[arg(long)]
    pub ffprobe: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Session document and the service to edit.
#[derive(clap::Args, Debug)]
pub struct ServiceTarget {
    /// Session document
    pub session: PathBuf,

    /// Service id
    #[arg(long)]
    pub service: u16,
}

#[derive(Subcommand, Debug)]
pub enum EpgCommand {
    /// Rebuild a schedule from the service's input durations
    Generate {
        #[command(flatten)]
        target: ServiceTarget,

        /// First programme start (RFC 3339 or `now`)
        #[arg(long, value_parser = parse_time, default_value = "now")]
        start: DateTime<Utc>,

        /// Hours to cover
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Extend the schedule to a horizon, filling gaps
    Fill {
        #[command(flatten)]
        target: ServiceTarget,

        /// Start of the covered horizon (RFC 3339 or `now`); keeps the current one when omitted
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// End of the covered horizon (RFC 3339 or `now`)
        #[arg(long, value_parser = parse_time)]
        until: DateTime<Utc>,
    },

    /// Merge events from an EIT XML file as manual programmes
    Import {
        /// Session document
        session: PathBuf,

        /// EIT XML file
        guide: PathBuf,

        /// Only this service
        #[arg(long)]
        service: Option<u16>,
    },

    /// Add a manual programme
    Add {
        #[command(flatten)]
        target: ServiceTarget,

        #[arg(long)]
        title: String,

        /// Start time (RFC 3339 or `now`)
        #[arg(long, value_parser = parse_time)]
        start: DateTime<Utc>,

        /// Duration in seconds
        #[arg(long)]
        duration: i64,

        #[arg(long, default_value = "")]
        short: String,

        #[arg(long, default_value = "")]
        extended: String,

        /// ISO 639-2 language code
        #[arg(long, default_value = "eng")]
        language: LanguageCode,
    },

    /// Remove a programme
    Delete {
        #[command(flatten)]
        target: ServiceTarget,

        /// Entry id
        #[arg(long)]
        entry: u32,
    },

    /// Copy a programme to start where it ends
    Duplicate {
        #[command(flatten)]
        target: ServiceTarget,

        /// Entry id
        #[arg(long)]
        entry: u32,
    },

    /// List schedule entries
    List {
        /// Session document
        session: PathBuf,

        /// Only this service
        #[arg(long)]
        service: Option<u16>,
    },

    /// Render the guide as EIT XML
    Export {
        /// Session document
        session: PathBuf,

        /// File to write; standard output when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Instant used to mark running programmes (RFC 3339 or `now`)
        #[arg(long, value_parser = parse_time, default_value = "now")]
        at: DateTime<Utc>,
    },
}

/// Script flavours for `export`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Plain,
    Posix,
    Batch,
}

impl From<ExportFormat> for ScriptFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Plain => ScriptFormat::Plain,
            ExportFormat::Posix => ScriptFormat::Posix,
            ExportFormat::Batch => ScriptFormat::Batch,
        }
    }
}

pub fn parse_modulation(s: &str) -> Result<Modulation, String> {
    Modulation::ALL
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| {
            let names: Vec<_> = Modulation::ALL.iter().map(|m| m.name()).collect();
            format!("unknown modulation '{s}', expected one of: {}", names.join(", "))
        })
}

pub fn parse_fec(s: &str) -> Result<FecRate, String> {
    Modulation::ALL
        .iter()
        .flat_map(|m| m.fec_rates())
        .copied()
        .find(|fec| fec.to_string() == s.trim())
        .ok_or_else(|| format!("unknown FEC rate '{s}', expected e.g. 3/4"))
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if s.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(s)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| format!("invalid time '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_modulation_names() {
        assert_eq!(parse_modulation("DVB-S2-8PSK"), Ok(Modulation::Dvbs2Psk8));
        assert_eq!(parse_modulation("dvb-s-qpsk"), Ok(Modulation::DvbsQpsk));
        assert!(parse_modulation("DVB-T").is_err());
    }

    #[test]
    fn test_parse_fec_rates() {
        assert_eq!(parse_fec("3/4"), Ok(FecRate::R3_4));
        assert_eq!(parse_fec("7/8"), Ok(FecRate::R7_8));
        assert_eq!(parse_fec("9/10"), Ok(FecRate::R9_10));
        assert!(parse_fec("1/9").is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time("2026-03-01T20:00:00+01:00"),
            Ok(Utc.with_ymd_and_hms(2026, 3, 1, 19, 0, 0).unwrap())
        );
        assert!(parse_time("now").is_ok());
        assert!(parse_time("tonight").is_err());
    }

    #[test]
    fn test_calc_arguments() {
        let args = Args::try_parse_from([
            "uplink",
            "calc",
            "--modulation",
            "DVB-S2-QPSK",
            "--fec",
            "2/3",
            "--symbol-rate",
            "22000000",
            "--pilots",
        ])
        .unwrap();
        let Commands::Calc(calc) = args.command else {
            panic!("expected calc");
        };
        assert_eq!(calc.modulation, Some(Modulation::Dvbs2Qpsk));
        assert_eq!(calc.fec, Some(FecRate::R2_3));
        assert_eq!(calc.symbol_rate, Some(22_000_000));
        assert!(calc.pilots);
        assert!(calc.session.is_none());
    }

    #[test]
    fn test_epg_add_arguments() {
        let args = Args::try_parse_from([
            "uplink",
            "-v",
            "epg",
            "add",
            "session.json",
            "--service",
            "2",
            "--title",
            "News",
            "--start",
            "2026-03-01T18:00:00Z",
            "--duration",
            "1800",
            "--language",
            "FRA",
        ])
        .unwrap();
        assert!(args.verbose);
        let Commands::Epg {
            command:
                EpgCommand::Add {
                    target,
                    title,
                    duration,
                    language,
                    ..
                },
        } = args.command
        else {
            panic!("expected epg add");
        };
        assert_eq!(target.service, 2);
        assert_eq!(target.session, PathBuf::from("session.json"));
        assert_eq!(title, "News");
        assert_eq!(duration, 1800);
        assert_eq!(language.as_str(), "fra");
    }

    #[test]
    fn test_epg_import_and_fill_arguments() {
        let args =
            Args::try_parse_from(["uplink", "epg", "import", "session.json", "eit.xml"]).unwrap();
        let Commands::Epg {
            command: EpgCommand::Import {
                guide, service, ..
            },
        } = args.command
        else {
            panic!("expected epg import");
        };
        assert_eq!(guide, PathBuf::from("eit.xml"));
        assert_eq!(service, None);

        let args = Args::try_parse_from([
            "uplink",
            "epg",
            "fill",
            "session.json",
            "--service",
            "1",
            "--from",
            "2026-03-01T18:00:00Z",
            "--until",
            "2026-03-02T18:00:00Z",
        ])
        .unwrap();
        let Commands::Epg {
            command: EpgCommand::Fill { from, until, .. },
        } = args.command
        else {
            panic!("expected epg fill");
        };
        assert_eq!(until - from.unwrap(), chrono::Duration::hours(24));
    }

    #[test]
    fn test_probe_needs_media_or_session() {
        assert!(Args::try_parse_from(["uplink", "probe"]).is_err());
        assert!(Args::try_parse_from(["uplink", "probe", "a.ts", "b.ts"]).is_ok());
        assert!(Args::try_parse_from(["uplink", "probe", "--session", "s.json"]).is_ok());
        assert!(Args::try_parse_from(["uplink", "probe", "--service", "1", "a.ts"]).is_err());
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["uplink", "-v", "-q", "preview", "s.json"]).is_err());
    }
}
