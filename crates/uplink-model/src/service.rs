//! Services carried in the multiplex.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::EncodingConfig;
use crate::epg::Epg;
use crate::error::ModelError;
use crate::input::{Input, SubtitleMode};

/// Program number of a service, unique within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u16);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Tv,
    Radio,
}

impl ServiceType {
    /// DVB service_type value.
    pub fn dvb_code(self) -> u8 {
        match self {
            Self::Tv => 0x01,
            Self::Radio => 0x02,
        }
    }
}

/// A configured service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub provider: String,

    #[serde(default)]
    pub service_type: ServiceType,

    /// Restart the input from the top when it ends.
    #[serde(default)]
    pub looping: bool,

    #[serde(default)]
    pub inputs: Vec<Input>,

    #[serde(default)]
    pub encoding: EncodingConfig,

    #[serde(default)]
    pub epg: Epg,
}

impl Service {
    /// A service with default encoding and no inputs.
    pub fn new(id: u16, name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: ServiceId(id),
            name: name.into(),
            provider: provider.into(),
            service_type: ServiceType::Tv,
            looping: false,
            inputs: Vec::new(),
            encoding: EncodingConfig::default(),
            epg: Epg::default(),
        }
    }

    /// Number of audio tracks the service carries.
    pub fn audio_track_count(&self) -> usize {
        self.inputs
            .first()
            .map(|input| input.audio_tracks.len())
            .unwrap_or(0)
    }

    /// Elementary stream bitrate the service needs in the multiplex.
    pub fn target_bitrate_bps(&self) -> u64 {
        self.encoding
            .target_bitrate_bps(self.service_type, self.audio_track_count())
    }

    /// Check names, encoding options and inputs.
    pub fn validate(&self) -> Result<(), ModelError> {
        let id = self.id.0;
        if id == 0 {
            return Err(ModelError::ReservedServiceId);
        }
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyServiceName(id));
        }
        self.encoding.validate(id)?;

        for input in &self.inputs {
            let invalid = |reason: &str| ModelError::InvalidInput {
                service: id,
                reason: reason.to_string(),
            };
            if let crate::input::InputSource::Playlist { items } = &input.source {
                if items.is_empty() {
                    return Err(invalid("playlist is empty"));
                }
            }
            match &input.subtitles {
                SubtitleMode::None => {}
                _ if self.service_type == ServiceType::Radio => {
                    return Err(invalid("radio services cannot carry subtitles"));
                }
                SubtitleMode::BurnIn { path, .. } if path.as_os_str().is_empty() => {
                    return Err(invalid("burned-in subtitles need a file"));
                }
                _ => {}
            }
        }

        for entry in &self.epg.entries {
            if !entry.metadata.content.is_valid() {
                return Err(ModelError::InvalidInput {
                    service: id,
                    reason: format!("entry {} has an invalid content type", entry.id),
                });
            }
        }

        Ok(())
    }
}
