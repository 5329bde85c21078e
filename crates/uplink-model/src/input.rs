//! Service inputs: media sources, track selection and subtitle treatment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::language::LanguageCode;

/// One playable media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaItem {
    /// Path of the file.
    pub locator: PathBuf,

    /// Duration in whole seconds, when known.
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl MediaItem {
    /// Media item with unknown duration.
    pub fn new(locator: impl Into<PathBuf>) -> Self {
        Self {
            locator: locator.into(),
            duration_secs: None,
        }
    }

    /// Media item with a known duration.
    pub fn with_duration(locator: impl Into<PathBuf>, duration_secs: u64) -> Self {
        Self {
            locator: locator.into(),
            duration_secs: Some(duration_secs),
        }
    }

    /// File name without directories.
    pub fn file_name(&self) -> String {
        self.locator
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.locator.to_string_lossy().into_owned())
    }

    /// File stem with separators turned into spaces, usable as a title.
    pub fn display_stem(&self) -> String {
        let stem = self
            .locator
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        stem.replace(['_', '.'], " ").trim().to_string()
    }
}

/// Where a service's media comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    /// A single media file.
    File { item: MediaItem },

    /// An existing concatenation list on disk, with the items it references.
    ConcatList {
        list: PathBuf,
        #[serde(default)]
        items: Vec<MediaItem>,
    },

    /// An ordered list of files managed by the operator.
    Playlist { items: Vec<MediaItem> },

    /// A live network stream. Has no duration.
    NetworkStream { url: Url },
}

impl InputSource {
    /// Media items in play order. Empty for live streams.
    pub fn media_items(&self) -> &[MediaItem] {
        match self {
            Self::File { item } => std::slice::from_ref(item),
            Self::ConcatList { items, .. } | Self::Playlist { items } => items,
            Self::NetworkStream { .. } => &[],
        }
    }

    /// Media items for editing, e.g. to record probed durations.
    pub fn media_items_mut(&mut self) -> &mut [MediaItem] {
        match self {
            Self::File { item } => std::slice::from_mut(item),
            Self::ConcatList { items, .. } | Self::Playlist { items } => items,
            Self::NetworkStream { .. } => &mut [],
        }
    }

    /// Returns true for live sources.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::NetworkStream { .. })
    }

    /// Short name of the source kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::ConcatList { .. } => "concat list",
            Self::Playlist { .. } => "playlist",
            Self::NetworkStream { .. } => "network stream",
        }
    }
}

/// Which stream of the source an audio track is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSelector {
    /// N-th audio stream of the source.
    Audio(u32),

    /// Absolute stream index in the source.
    Index(u32),
}

impl StreamSelector {
    /// Stream specifier as understood by the transcoder.
    pub fn specifier(self) -> String {
        match self {
            Self::Audio(n) => format!("a:{n}"),
            Self::Index(n) => n.to_string(),
        }
    }
}

/// A selected audio track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioTrack {
    pub stream: StreamSelector,
    pub language: LanguageCode,
}

impl Default for AudioTrack {
    fn default() -> Self {
        Self {
            stream: StreamSelector::Audio(0),
            language: LanguageCode::english(),
        }
    }
}

/// Burned-in subtitle size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl SubtitleSize {
    /// Font size handed to the subtitle renderer.
    pub fn font_size(self) -> u32 {
        match self {
            Self::Small => 18,
            Self::Medium => 24,
            Self::Large => 36,
            Self::ExtraLarge => 48,
        }
    }
}

/// How subtitles reach the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtitleMode {
    /// No subtitles.
    #[default]
    None,

    /// Copy an embedded subtitle stream by absolute index.
    Embedded { stream: u32 },

    /// Render an external subtitle file into the picture.
    BurnIn { path: PathBuf, size: SubtitleSize },
}

impl SubtitleMode {
    /// Returns true if the subtitle file needs a forced style (SubRip).
    pub fn needs_forced_style(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.eq_ignore_ascii_case("srt"))
            .unwrap_or(false)
    }
}

/// A configured service input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    pub source: InputSource,

    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,

    #[serde(default)]
    pub subtitles: SubtitleMode,
}

impl Input {
    /// Input with the default audio track and no subtitles.
    pub fn new(source: InputSource) -> Self {
        Self {
            source,
            audio_tracks: vec![AudioTrack::default()],
            subtitles: SubtitleMode::None,
        }
    }

    /// Single-file input.
    pub fn file(item: MediaItem) -> Self {
        Self::new(InputSource::File { item })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_stem() {
        let item = MediaItem::new("/media/The_Big.Show.ts");
        assert_eq!(item.display_stem(), "The Big Show");
        assert_eq!(item.file_name(), "The_Big.Show.ts");
    }

    #[test]
    fn test_stream_selector_specifier() {
        assert_eq!(StreamSelector::Audio(1).specifier(), "a:1");
        assert_eq!(StreamSelector::Index(3).specifier(), "3");
    }

    #[test]
    fn test_live_input_has_no_items() {
        let source = InputSource::NetworkStream {
            url: Url::parse("udp://239.1.1.1:1234").unwrap(),
        };
        assert!(source.is_live());
        assert!(source.media_items().is_empty());
    }

    #[test]
    fn test_forced_style_only_for_srt() {
        assert!(SubtitleMode::needs_forced_style(Path::new("a.SRT")));
        assert!(!SubtitleMode::needs_forced_style(Path::new("a.ass")));
    }
}
