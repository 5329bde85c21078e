//! Service, schedule and transmission model for the uplink broadcaster.
//!
//! Pure data plus the invariants that can be checked locally: unique
//! program numbers, codec option sets, modulation/FEC combinations and the
//! frequency plan. Cross-entry schedule rules live in `uplink-schedule`.

mod encoding;
mod epg;
mod error;
mod input;
mod language;
pub mod persist;
mod service;
mod session;
mod store;
mod transmission;

pub use encoding::{
    AspectRatio, AudioCodec, AudioSettings, CodecFamily, EncodingConfig, FrameRate, PixelFormat,
    Preset, Resolution, ScanType, VideoCodec, VideoFormat, VideoSettings,
    MAX_VIDEO_BITRATE_KBPS,
};
pub use epg::{
    ContentType, EntryId, EntryOrigin, EntryTemplate, Epg, EventMetadata, GuideDefaults,
    ParentalRating, ScheduleEntry,
};
pub use error::ModelError;
pub use input::{
    AudioTrack, Input, InputSource, MediaItem, StreamSelector, SubtitleMode, SubtitleSize,
};
pub use language::LanguageCode;
pub use service::{Service, ServiceId, ServiceType};
pub use session::{Session, TimeSignalConfig, ToolPaths};
pub use store::{SessionSnapshot, SessionStore};
pub use transmission::{
    DvbStandard, FecRate, Modulation, MuxRateSetting, NetworkIds, TransmissionParameters,
    L_BAND_KHZ, SYMBOL_RATE_RANGE,
};

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
