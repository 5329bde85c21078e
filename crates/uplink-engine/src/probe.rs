//! Media inspection through `ffprobe`.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use uplink_model::{AudioTrack, LanguageCode, MediaItem, StreamSelector};

use crate::error::ProbeError;

/// Language used when a stream carries no usable tag.
const UNDETERMINED: &str = "und";

/// One elementary stream found in a media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbedStream {
    /// Absolute stream index in the file.
    pub index: u32,

    /// Position among streams of the same type.
    pub position: u32,

    pub codec: Option<String>,
    pub language: LanguageCode,
    pub title: Option<String>,
}

/// What `ffprobe` reported about a media file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaProbe {
    /// Duration in whole seconds, rounded.
    pub duration_secs: Option<u64>,
    pub video: Vec<ProbedStream>,
    pub audio: Vec<ProbedStream>,
    pub subtitles: Vec<ProbedStream>,
}

impl MediaProbe {
    /// One audio track per audio stream, selected by position.
    pub fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.audio
            .iter()
            .map(|stream| AudioTrack {
                stream: StreamSelector::Audio(stream.position),
                language: stream.language.clone(),
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    streams: Vec<RawStream>,
    #[serde(default)]
    format: Option<RawFormat>,
}

#[derive(Deserialize)]
struct RawStream {
    index: u32,
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_output(json: &str) -> Result<MediaProbe, ProbeError> {
    let raw: RawOutput = serde_json::from_str(json)?;
    let mut probe = MediaProbe {
        duration_secs: raw
            .format
            .and_then(|format| format.duration)
            .and_then(|duration| duration.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| secs.round() as u64),
        ..Default::default()
    };

    for stream in raw.streams {
        let list = match stream.codec_type.as_deref() {
            Some("video") => &mut probe.video,
            Some("audio") => &mut probe.audio,
            Some("subtitle") => &mut probe.subtitles,
            _ => continue,
        };
        let language = stream
            .tags
            .get("language")
            .and_then(|tag| tag.parse::<LanguageCode>().ok())
            .unwrap_or_else(undetermined);
        let position = list.len() as u32;
        list.push(ProbedStream {
            index: stream.index,
            position,
            codec: stream.codec_name,
            language,
            title: stream.tags.get("title").cloned(),
        });
    }

    Ok(probe)
}

fn undetermined() -> LanguageCode {
    UNDETERMINED
        .parse()
        .unwrap_or_else(|_| LanguageCode::english())
}

/// Run `ffprobe` on a file.
#[instrument(name = "probe_media", skip(ffprobe))]
pub fn probe_media(ffprobe: &Path, path: &Path) -> Result<MediaProbe, ProbeError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ProbeError::Spawn {
            program: ffprobe.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Failed {
            path: path.to_path_buf(),
            message: match stderr.trim() {
                "" => output.status.to_string(),
                text => text.to_string(),
            },
        });
    }

    let probe = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
    debug!(
        duration = ?probe.duration_secs,
        audio = probe.audio.len(),
        subtitles = probe.subtitles.len(),
        "Probed media"
    );
    Ok(probe)
}

/// Probe a media item and record its duration.
pub fn probe_item(ffprobe: &Path, item: &mut MediaItem) -> Result<MediaProbe, ProbeError> {
    let probe = probe_media(ffprobe, &item.locator)?;
    if probe.duration_secs.is_some() {
        item.duration_secs = probe.duration_secs;
    }
    Ok(probe)
}
