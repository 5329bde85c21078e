//! Physical-layer transmission parameters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Transmission standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DvbStandard {
    #[serde(rename = "DVB-S")]
    DvbS,
    #[serde(rename = "DVB-S2")]
    DvbS2,
}

/// Modulation, which also fixes the standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    #[serde(rename = "DVB-S-QPSK")]
    DvbsQpsk,
    #[serde(rename = "DVB-S2-QPSK")]
    Dvbs2Qpsk,
    #[serde(rename = "DVB-S2-8PSK")]
    Dvbs2Psk8,
    #[serde(rename = "DVB-S2-16APSK")]
    Dvbs2Apsk16,
    #[serde(rename = "DVB-S2-32APSK")]
    Dvbs2Apsk32,
}

impl Modulation {
    /// Every supported modulation.
    pub const ALL: [Modulation; 5] = [
        Self::DvbsQpsk,
        Self::Dvbs2Qpsk,
        Self::Dvbs2Psk8,
        Self::Dvbs2Apsk16,
        Self::Dvbs2Apsk32,
    ];

    /// Name used by the output device.
    pub fn name(self) -> &'static str {
        match self {
            Self::DvbsQpsk => "DVB-S-QPSK",
            Self::Dvbs2Qpsk => "DVB-S2-QPSK",
            Self::Dvbs2Psk8 => "DVB-S2-8PSK",
            Self::Dvbs2Apsk16 => "DVB-S2-16APSK",
            Self::Dvbs2Apsk32 => "DVB-S2-32APSK",
        }
    }

    pub fn standard(self) -> DvbStandard {
        match self {
            Self::DvbsQpsk => DvbStandard::DvbS,
            _ => DvbStandard::DvbS2,
        }
    }

    /// Bits carried per constellation symbol.
    pub fn bits_per_symbol(self) -> u32 {
        match self {
            Self::DvbsQpsk | Self::Dvbs2Qpsk => 2,
            Self::Dvbs2Psk8 => 3,
            Self::Dvbs2Apsk16 => 4,
            Self::Dvbs2Apsk32 => 5,
        }
    }

    /// FEC rates defined for this modulation.
    pub fn fec_rates(self) -> &'static [FecRate] {
        use FecRate::*;
        match self {
            Self::DvbsQpsk => &[R1_2, R2_3, R3_4, R5_6, R7_8],
            Self::Dvbs2Qpsk => &[R1_4, R1_3, R2_5, R1_2, R3_5, R2_3, R3_4, R4_5, R5_6, R8_9, R9_10],
            Self::Dvbs2Psk8 => &[R3_5, R2_3, R3_4, R5_6, R8_9, R9_10],
            Self::Dvbs2Apsk16 => &[R2_3, R3_4, R4_5, R5_6, R8_9, R9_10],
            Self::Dvbs2Apsk32 => &[R3_4, R4_5, R5_6, R8_9, R9_10],
        }
    }

    /// Returns true if `fec` is defined for this modulation.
    pub fn supports(self, fec: FecRate) -> bool {
        self.fec_rates().contains(&fec)
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Forward error correction code rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FecRate {
    #[serde(rename = "1/4")]
    R1_4,
    #[serde(rename = "1/3")]
    R1_3,
    #[serde(rename = "2/5")]
    R2_5,
    #[serde(rename = "1/2")]
    R1_2,
    #[serde(rename = "3/5")]
    R3_5,
    #[serde(rename = "2/3")]
    R2_3,
    #[serde(rename = "3/4")]
    R3_4,
    #[serde(rename = "4/5")]
    R4_5,
    #[serde(rename = "5/6")]
    R5_6,
    #[serde(rename = "7/8")]
    R7_8,
    #[serde(rename = "8/9")]
    R8_9,
    #[serde(rename = "9/10")]
    R9_10,
}

impl FecRate {
    /// Numerator and denominator.
    pub fn ratio(self) -> (u32, u32) {
        match self {
            Self::R1_4 => (1, 4),
            Self::R1_3 => (1, 3),
            Self::R2_5 => (2, 5),
            Self::R1_2 => (1, 2),
            Self::R3_5 => (3, 5),
            Self::R2_3 => (2, 3),
            Self::R3_4 => (3, 4),
            Self::R4_5 => (4, 5),
            Self::R5_6 => (5, 6),
            Self::R7_8 => (7, 8),
            Self::R8_9 => (8, 9),
            Self::R9_10 => (9, 10),
        }
    }
}

impl fmt::Display for FecRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (num, den) = self.ratio();
        write!(f, "{num}/{den}")
    }
}

/// How the multiplex rate is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxRateSetting {
    /// Derive the rate from modulation, FEC and symbol rate.
    #[default]
    Auto,

    /// Operator-entered rate, checked against the derived one.
    Manual { bps: u64 },
}

/// Network-level identifiers carried in the signalling tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkIds {
    pub network_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
}

impl Default for NetworkIds {
    fn default() -> Self {
        Self {
            network_id: 0xFF01,
            transport_stream_id: 0x0001,
            original_network_id: 0x0001,
        }
    }
}

/// Accepted symbol rates, in baud.
pub const SYMBOL_RATE_RANGE: std::ops::RangeInclusive<u32> = 100_000..=72_000_000;

/// Accepted output (L-band) frequencies, in kHz.
pub const L_BAND_KHZ: std::ops::RangeInclusive<u32> = 950_000..=2_150_000;

/// Everything the multiplexer's output stage needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransmissionParameters {
    pub modulation: Modulation,
    pub fec: FecRate,

    /// Symbol rate in baud.
    pub symbol_rate: u32,

    /// Satellite downlink frequency in kHz.
    pub frequency_khz: u32,

    /// LNB local oscillator frequency in kHz.
    pub lnb_lo_khz: u32,

    /// DVB-S2 pilot symbols.
    #[serde(default)]
    pub pilots: bool,

    #[serde(default)]
    pub mux_rate: MuxRateSetting,

    /// Output device identifier, passed through untouched.
    pub device: String,

    #[serde(default)]
    pub network: NetworkIds,
}

impl Default for TransmissionParameters {
    fn default() -> Self {
        Self {
            modulation: Modulation::DvbsQpsk,
            fec: FecRate::R3_4,
            symbol_rate: 27_500_000,
            frequency_khz: 11_797_000,
            lnb_lo_khz: 10_600_000,
            pilots: false,
            mux_rate: MuxRateSetting::Auto,
            device: "0".to_string(),
            network: NetworkIds::default(),
        }
    }
}

impl TransmissionParameters {
    /// Intermediate frequency fed to the output device, in Hz.
    pub fn output_frequency_hz(&self) -> u64 {
        u64::from(self.frequency_khz.abs_diff(self.lnb_lo_khz)) * 1000
    }

    /// Check ranges and the modulation/FEC combination.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.modulation.supports(self.fec) {
            return Err(ModelError::UnsupportedFec {
                modulation: self.modulation,
                fec: self.fec,
            });
        }
        if !SYMBOL_RATE_RANGE.contains(&self.symbol_rate) {
            return Err(ModelError::InvalidTransmission(format!(
                "symbol rate {} Bd is out of range",
                self.symbol_rate
            )));
        }
        if self.pilots && self.modulation.standard() == DvbStandard::DvbS {
            return Err(ModelError::InvalidTransmission(
                "pilots are only defined for DVB-S2".to_string(),
            ));
        }
        if let MuxRateSetting::Manual { bps: 0 } = self.mux_rate {
            return Err(ModelError::InvalidTransmission(
                "multiplex rate must be positive".to_string(),
            ));
        }
        if self.device.trim().is_empty() {
            return Err(ModelError::InvalidTransmission(
                "no output device configured".to_string(),
            ));
        }
        self.validate_frequency_plan()
    }

    fn validate_frequency_plan(&self) -> Result<(), ModelError> {
        let band = match self.lnb_lo_khz {
            9_750_000 => Some(10_700_000..=11_700_000),
            10_600_000 => Some(11_700_000..=12_750_000),
            _ => None,
        };
        if let Some(band) = band {
            if !band.contains(&self.frequency_khz) {
                return Err(ModelError::InvalidTransmission(format!(
                    "{} kHz is outside the band of a {} kHz local oscillator",
                    self.frequency_khz, self.lnb_lo_khz
                )));
            }
        }

        let output_khz = self.frequency_khz.abs_diff(self.lnb_lo_khz);
        if !L_BAND_KHZ.contains(&output_khz) {
            return Err(ModelError::InvalidTransmission(format!(
                "output frequency {output_khz} kHz is outside the L-band"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters_are_valid() {
        let params = TransmissionParameters::default();
        params.validate().unwrap();
        assert_eq!(params.output_frequency_hz(), 1_197_000_000);
    }

    #[test]
    fn test_fec_must_match_modulation() {
        let params = TransmissionParameters {
            modulation: Modulation::DvbsQpsk,
            fec: FecRate::R9_10,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ModelError::UnsupportedFec { .. })
        ));
        assert!(Modulation::Dvbs2Qpsk.supports(FecRate::R9_10));
        assert!(!Modulation::Dvbs2Apsk32.supports(FecRate::R2_3));
    }

    #[test]
    fn test_frequency_outside_lnb_band() {
        let params = TransmissionParameters {
            frequency_khz: 11_500_000,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = TransmissionParameters {
            frequency_khz: 11_500_000,
            lnb_lo_khz: 9_750_000,
            ..Default::default()
        };
        params.validate().unwrap();
        assert_eq!(params.output_frequency_hz(), 1_750_000_000);
    }

    #[test]
    fn test_pilots_rejected_for_dvbs() {
        let params = TransmissionParameters {
            pilots: true,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_fec_serializes_as_ratio() {
        assert_eq!(serde_json::to_string(&FecRate::R3_4).unwrap(), "\"3/4\"");
        assert_eq!(
            serde_json::to_string(&Modulation::Dvbs2Psk8).unwrap(),
            "\"DVB-S2-8PSK\""
        );
    }
}
