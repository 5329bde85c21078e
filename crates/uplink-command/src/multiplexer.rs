//! Multiplexer and time-signal command lines.

use std::net::SocketAddr;
use std::path::Path;

use uplink_model::{DvbStandard, TransmissionParameters};

/// Bitrate cap of the injected time and date tables.
pub const TIME_SIGNAL_BITRATE: u32 = 50_000;

/// PID of the time and date tables.
const TIME_SIGNAL_PID: &str = "0x14";

/// PID of the event information tables.
const EIT_PID: &str = "0x0012";

/// Seconds between analysis reports.
const ANALYSIS_INTERVAL_SECS: u32 = 90;

/// Builder for the multiplexer arguments.
///
/// The first encoder arrives on standard input; every other encoder is
/// merged from its loopback endpoint.
pub(crate) struct MultiplexerOptionsBuilder<'a> {
    pub tsp: &'a Path,
    pub mux_rate_bps: u64,
    pub merged: &'a [SocketAddr],
    pub time_signal: SocketAddr,
    pub analysis_report: &'a Path,
    pub guide: Option<&'a Path>,
    pub transmission: &'a TransmissionParameters,
}

impl MultiplexerOptionsBuilder<'_> {
    /// Build the argument vector, not including the program.
    pub(crate) fn build(&self) -> Vec<String> {
        let mut tokens = vec![
            "-v".to_string(),
            "-b".to_string(),
            self.mux_rate_bps.to_string(),
            "-I".to_string(),
            "file".to_string(),
            "-".to_string(),
        ];

        for endpoint in self.merged {
            push(&mut tokens, &["-P", "merge"]);
            tokens.push(format!("{} -I ip {}", shell_word(self.tsp), endpoint));
        }

        push(&mut tokens, &["-P", "datainject", "-r", "-s"]);
        tokens.push(self.time_signal.to_string());
        tokens.push("-b".to_string());
        tokens.push(TIME_SIGNAL_BITRATE.to_string());
        push(&mut tokens, &["-p", TIME_SIGNAL_PID]);

        push(&mut tokens, &["-P", "analyze", "-i"]);
        tokens.push(ANALYSIS_INTERVAL_SECS.to_string());
        tokens.push("-o".to_string());
        tokens.push(self.analysis_report.to_string_lossy().into_owned());

        if let Some(guide) = self.guide {
            push(&mut tokens, &["-P", "eitinject", "--pid", EIT_PID, "-f"]);
            tokens.push(guide.to_string_lossy().into_owned());
        }

        push(
            &mut tokens,
            &["-P", "nit", "--create", "--build-service-list-descriptors", "--network-id"],
        );
        tokens.push(format!("0x{:04X}", self.transmission.network.network_id));

        self.add_output(&mut tokens);
        tokens
    }

    fn add_output(&self, tokens: &mut Vec<String>) {
        let params = self.transmission;
        push(tokens, &["-O", "dektec", "-d", &params.device]);
        push(tokens, &["--modulation", params.modulation.name()]);
        tokens.push("-f".to_string());
        tokens.push(params.output_frequency_hz().to_string());
        tokens.push("--convolutional-rate".to_string());
        tokens.push(params.fec.to_string());
        tokens.push("--symbol-rate".to_string());
        tokens.push(params.symbol_rate.to_string());
        if params.pilots && params.modulation.standard() == DvbStandard::DvbS2 {
            tokens.push("--pilots".to_string());
        }
        tokens.push("--stuffing".to_string());
    }
}

fn push(tokens: &mut Vec<String>, args: &[&str]) {
    tokens.extend(args.iter().map(|a| a.to_string()));
}

/// Time-signal injector arguments: it feeds the multiplexer on `endpoint`'s port.
pub(crate) fn time_signal_args(endpoint: SocketAddr) -> Vec<String> {
    vec![endpoint.port().to_string()]
}

/// Program path as one word of a nested command line.
fn shell_word(path: &Path) -> String {
    let text = path.to_string_lossy();
    if text.contains(char::is_whitespace) {
        format!("\"{text}\"")
    } else {
        text.into_owned()
    }
}
