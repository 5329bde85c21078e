//! The whole broadcast session: services, transmission and tool settings.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::epg::GuideDefaults;
use crate::error::ModelError;
use crate::service::{Service, ServiceId};
use crate::transmission::TransmissionParameters;

/// External programs the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub tsp: PathBuf,
    pub tdt: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            tsp: "tsp".into(),
            tdt: "tdt".into(),
        }
    }
}

/// Where the multiplexer accepts time and date packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSignalConfig {
    pub address: IpAddr,
    pub port: u16,
}

impl TimeSignalConfig {
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for TimeSignalConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 32000,
        }
    }
}

/// A complete broadcast configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub transmission: TransmissionParameters,

    #[serde(default)]
    pub tools: ToolPaths,

    #[serde(default)]
    pub time_signal: TimeSignalConfig,

    #[serde(default)]
    pub guide: GuideDefaults,

    /// Where the multiplexer writes its periodic stream analysis.
    #[serde(default)]
    pub analysis_report: Option<PathBuf>,
}

impl Session {
    /// Look up a service.
    pub fn service(&self, id: ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Look up a service for editing.
    pub fn service_mut(&mut self, id: ServiceId) -> Result<&mut Service, ModelError> {
        self.services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ModelError::ServiceNotFound(id.0))
    }

    /// Add a service, keeping program numbers unique.
    pub fn add_service(&mut self, service: Service) -> Result<(), ModelError> {
        if self.service(service.id).is_some() {
            return Err(ModelError::DuplicateServiceId(service.id.0));
        }
        service.validate()?;
        self.services.push(service);
        Ok(())
    }

    /// Remove a service and return it.
    pub fn remove_service(&mut self, id: ServiceId) -> Result<Service, ModelError> {
        let index = self
            .services
            .iter()
            .position(|s| s.id == id)
            .ok_or(ModelError::ServiceNotFound(id.0))?;
        Ok(self.services.remove(index))
    }

    /// Check every service and the transmission parameters.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.id) {
                return Err(ModelError::DuplicateServiceId(service.id.0));
            }
            service.validate()?;
        }
        self.transmission.validate()
    }
}
