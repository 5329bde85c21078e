//! Encoder option sets.
//!
//! Every option is a closed enum so an invalid combination is caught when
//! the session is validated, not when the encoder refuses to start.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::service::ServiceType;

/// Hardware family of a video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    /// CPU encoders.
    Software,

    /// NVIDIA NVENC.
    Nvenc,

    /// Intel Quick Sync.
    Qsv,
}

impl CodecFamily {
    /// Presets accepted by encoders of this family, fastest first.
    pub fn presets(self) -> &'static [Preset] {
        use Preset::*;
        match self {
            Self::Software => &[
                Ultrafast, Superfast, Veryfast, Faster, Fast, Medium, Slow, Slower, Veryslow,
            ],
            Self::Nvenc => &[P1, P2, P3, P4, P5, P6, P7],
            Self::Qsv => &[Veryfast, Faster, Fast, Medium, Slow, Slower, Veryslow],
        }
    }

    /// Preset used when none is configured.
    pub fn default_preset(self) -> Preset {
        match self {
            Self::Software | Self::Qsv => Preset::Medium,
            Self::Nvenc => Preset::P4,
        }
    }
}

/// Video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    Mpeg2video,
    Libx264,
    Libx265,
    Mpeg4,
    LibvpxVp9,
    H264Nvenc,
    HevcNvenc,
    H264Qsv,
    HevcQsv,
}

impl VideoCodec {
    /// Every supported video encoder.
    pub const ALL: [VideoCodec; 9] = [
        Self::Mpeg2video,
        Self::Libx264,
        Self::Libx265,
        Self::Mpeg4,
        Self::LibvpxVp9,
        Self::H264Nvenc,
        Self::HevcNvenc,
        Self::H264Qsv,
        Self::HevcQsv,
    ];

    /// Encoder name as understood by the transcoder.
    pub fn encoder_name(self) -> &'static str {
        match self {
            Self::Mpeg2video => "mpeg2video",
            Self::Libx264 => "libx264",
            Self::Libx265 => "libx265",
            Self::Mpeg4 => "mpeg4",
            Self::LibvpxVp9 => "libvpx-vp9",
            Self::H264Nvenc => "h264_nvenc",
            Self::HevcNvenc => "hevc_nvenc",
            Self::H264Qsv => "h264_qsv",
            Self::HevcQsv => "hevc_qsv",
        }
    }

    /// Hardware family.
    pub fn family(self) -> CodecFamily {
        match self {
            Self::H264Nvenc | Self::HevcNvenc => CodecFamily::Nvenc,
            Self::H264Qsv | Self::HevcQsv => CodecFamily::Qsv,
            _ => CodecFamily::Software,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoder_name())
    }
}

/// Encoder speed/quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
}

impl Preset {
    /// Preset name as understood by the transcoder.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
            Self::P4 => "p4",
            Self::P5 => "p5",
            Self::P6 => "p6",
            Self::P7 => "p7",
        }
    }
}

/// Output pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv420p10le,
    Yuv422p10le,
}

impl PixelFormat {
    /// Every supported pixel format.
    pub const ALL: [PixelFormat; 4] = [
        Self::Yuv420p,
        Self::Yuv422p,
        Self::Yuv420p10le,
        Self::Yuv422p10le,
    ];

    /// Format name as understood by the transcoder.
    pub fn name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv420p10le => "yuv420p10le",
            Self::Yuv422p10le => "yuv422p10le",
        }
    }
}

/// Display aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "16:9")]
    Widescreen,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "4:3",
            Self::Widescreen => "16:9",
        }
    }
}

/// Frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Sd576,
    Sd480,
    Hd720,
    Hd1080,
    Uhd2160,
    Dci2160,
}

impl Resolution {
    /// Width and height in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Sd576 => (720, 576),
            Self::Sd480 => (720, 480),
            Self::Hd720 => (1280, 720),
            Self::Hd1080 => (1920, 1080),
            Self::Uhd2160 => (3840, 2160),
            Self::Dci2160 => (4096, 2160),
        }
    }
}

/// Scanning mode. Interlaced modes carry the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Progressive,
    TopFieldFirst,
    BottomFieldFirst,
}

impl ScanType {
    /// Field order flag for interlaced output.
    pub fn field_order(self) -> Option<&'static str> {
        match self {
            Self::Progressive => None,
            Self::TopFieldFirst => Some("tt"),
            Self::BottomFieldFirst => Some("bb"),
        }
    }
}

/// Frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRate {
    #[serde(rename = "24")]
    Film,
    #[serde(rename = "25")]
    Pal,
    #[serde(rename = "30000/1001")]
    Ntsc,
    #[serde(rename = "50")]
    PalHigh,
    #[serde(rename = "60000/1001")]
    NtscHigh,
}

impl FrameRate {
    /// Rate as passed to the transcoder.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Film => "24",
            Self::Pal => "25",
            Self::Ntsc => "30000/1001",
            Self::PalHigh => "50",
            Self::NtscHigh => "60000/1001",
        }
    }
}

/// Output raster: frame size, scanning and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoFormat {
    pub resolution: Resolution,
    pub scan: ScanType,
    pub frame_rate: FrameRate,
}

impl VideoFormat {
    /// Broadcast rasters offered to operators.
    pub const SUPPORTED: [VideoFormat; 20] = {
        use FrameRate::*;
        use Resolution::*;
        use ScanType::*;
        const fn f(resolution: Resolution, scan: ScanType, frame_rate: FrameRate) -> VideoFormat {
            VideoFormat {
                resolution,
                scan,
                frame_rate,
            }
        }
        [
            f(Sd576, TopFieldFirst, Pal),
            f(Sd576, Progressive, Pal),
            f(Hd720, Progressive, Pal),
            f(Hd1080, TopFieldFirst, Pal),
            f(Hd1080, Progressive, Pal),
            f(Sd480, BottomFieldFirst, Ntsc),
            f(Sd480, Progressive, Ntsc),
            f(Hd720, Progressive, Ntsc),
            f(Hd1080, TopFieldFirst, Ntsc),
            f(Hd1080, Progressive, Ntsc),
            f(Hd1080, Progressive, Film),
            f(Uhd2160, Progressive, Film),
            f(Dci2160, Progressive, Film),
            f(Hd720, Progressive, PalHigh),
            f(Hd1080, Progressive, PalHigh),
            f(Hd720, Progressive, NtscHigh),
            f(Hd1080, Progressive, NtscHigh),
            f(Uhd2160, Progressive, PalHigh),
            f(Uhd2160, Progressive, NtscHigh),
            f(Sd576, BottomFieldFirst, Pal),
        ]
    };

    /// Frame size as `WxH`.
    pub fn size(&self) -> String {
        let (w, h) = self.resolution.dimensions();
        format!("{w}x{h}")
    }

    /// Returns true if the raster is in the supported list.
    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self::SUPPORTED[0]
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, h) = self.resolution.dimensions();
        let scan = match self.scan {
            ScanType::Progressive => 'p',
            _ => 'i',
        };
        write!(f, "{}{} @ {}", h, scan, self.frame_rate.as_str())
    }
}

/// Audio encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Mp2,
    Ac3,
    Aac,
    Eac3,
}

impl AudioCodec {
    /// Every supported audio encoder.
    pub const ALL: [AudioCodec; 4] = [Self::Mp2, Self::Ac3, Self::Aac, Self::Eac3];

    /// Encoder name as understood by the transcoder.
    pub fn encoder_name(self) -> &'static str {
        match self {
            Self::Mp2 => "mp2",
            Self::Ac3 => "ac3",
            Self::Aac => "aac",
            Self::Eac3 => "eac3",
        }
    }

    /// Allowed bitrates in kbps.
    pub fn bitrates_kbps(self) -> &'static [u32] {
        match self {
            Self::Mp2 => &[128, 192, 224, 256, 320, 384],
            Self::Ac3 => &[192, 224, 256, 320, 384, 448, 640],
            Self::Aac => &[96, 128, 160, 192, 256, 320],
            Self::Eac3 => &[192, 224, 256, 384, 448, 640],
        }
    }

    /// Allowed sample rates in Hz.
    pub fn sample_rates(self) -> &'static [u32] {
        match self {
            Self::Mp2 | Self::Ac3 => &[48_000, 44_100, 32_000],
            Self::Aac => &[48_000, 44_100, 32_000, 24_000, 22_050],
            Self::Eac3 => &[48_000],
        }
    }

    /// Bitrate used when switching to this codec.
    pub fn default_bitrate_kbps(self) -> u32 {
        match self {
            Self::Mp2 => 192,
            Self::Ac3 => 384,
            Self::Aac => 128,
            Self::Eac3 => 224,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoder_name())
    }
}

/// Video encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub preset: Preset,
    pub bitrate_kbps: u32,
    pub pixel_format: PixelFormat,
    pub aspect: AspectRatio,
    pub format: VideoFormat,
    /// Allow B-frames.
    pub b_frames: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::Mpeg2video,
            preset: Preset::Medium,
            bitrate_kbps: 6000,
            pixel_format: PixelFormat::Yuv420p,
            aspect: AspectRatio::Widescreen,
            format: VideoFormat::default(),
            b_frames: true,
        }
    }
}

/// Audio encoder settings, applied to every selected track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioSettings {
    pub codec: AudioCodec,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    /// EBU R128 loudness normalization.
    pub loudnorm: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Mp2,
            bitrate_kbps: 192,
            sample_rate: 48_000,
            loudnorm: true,
        }
    }
}

/// Per-service encoding configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodingConfig {
    pub video: VideoSettings,
    pub audio: AudioSettings,
}

/// Highest accepted video bitrate.
pub const MAX_VIDEO_BITRATE_KBPS: u32 = 80_000;

impl EncodingConfig {
    /// Check every option against its codec's allowed set.
    pub fn validate(&self, service: u16) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidEncoding { service, reason };

        let video = &self.video;
        let family = video.codec.family();
        if !family.presets().contains(&video.preset) {
            return Err(invalid(format!(
                "preset {} is not available for {}",
                video.preset.name(),
                video.codec
            )));
        }
        if video.bitrate_kbps == 0 || video.bitrate_kbps > MAX_VIDEO_BITRATE_KBPS {
            return Err(invalid(format!(
                "video bitrate {} kbps is out of range",
                video.bitrate_kbps
            )));
        }
        if !video.format.is_supported() {
            return Err(invalid(format!("video format {} is not supported", video.format)));
        }

        let audio = &self.audio;
        if !audio.codec.bitrates_kbps().contains(&audio.bitrate_kbps) {
            return Err(invalid(format!(
                "{} does not support {} kbps",
                audio.codec, audio.bitrate_kbps
            )));
        }
        if !audio.codec.sample_rates().contains(&audio.sample_rate) {
            return Err(invalid(format!(
                "{} does not support {} Hz",
                audio.codec, audio.sample_rate
            )));
        }

        Ok(())
    }

    /// Elementary stream bitrate of a service with `audio_tracks` tracks.
    ///
    /// Radio services carry no video.
    pub fn target_bitrate_bps(&self, service_type: ServiceType, audio_tracks: usize) -> u64 {
        let video = match service_type {
            ServiceType::Tv => u64::from(self.video.bitrate_kbps) * 1000,
            ServiceType::Radio => 0,
        };
        video + u64::from(self.audio.bitrate_kbps) * 1000 * audio_tracks as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_encoding_is_valid() {
        EncodingConfig::default().validate(1).unwrap();
    }

    #[test]
    fn test_preset_must_match_codec_family() {
        let mut config = EncodingConfig::default();
        config.video.codec = VideoCodec::H264Nvenc;
        assert!(config.validate(1).is_err());

        config.video.preset = CodecFamily::Nvenc.default_preset();
        config.validate(1).unwrap();
    }

    #[test]
    fn test_audio_bitrate_must_match_codec() {
        let mut config = EncodingConfig::default();
        config.audio.codec = AudioCodec::Eac3;
        config.audio.bitrate_kbps = AudioCodec::Eac3.default_bitrate_kbps();
        config.validate(1).unwrap();

        config.audio.sample_rate = 44_100;
        let err = config.validate(1).unwrap_err();
        assert!(err.to_string().contains("44100 Hz"));
    }

    #[test]
    fn test_supported_formats_are_distinct() {
        for (i, a) in VideoFormat::SUPPORTED.iter().enumerate() {
            for b in &VideoFormat::SUPPORTED[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(VideoFormat::default().size(), "720x576");
        assert_eq!(VideoFormat::default().scan.field_order(), Some("tt"));
    }

    #[test]
    fn test_target_bitrate() {
        let config = EncodingConfig::default();
        assert_eq!(config.target_bitrate_bps(ServiceType::Tv, 2), 6_384_000);
        assert_eq!(config.target_bitrate_bps(ServiceType::Radio, 1), 192_000);
    }
}
