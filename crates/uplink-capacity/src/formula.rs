//! Multiplex rate from the physical frame structure.
//!
//! Both directions, deriving a rate and validating an entered one, go
//! through [`FrameBudget`].

use tracing::debug;

use uplink_model::{DvbStandard, FecRate, Modulation, MuxRateSetting, TransmissionParameters};

use crate::error::CapacityError;
use crate::CapacityResult;

/// Allowed deviation of an entered rate, in parts per million of the derived rate.
pub const TOLERANCE_PPM: u64 = 1000;

/// DVB-S2 baseband header length in bits.
const BB_HEADER_BITS: u64 = 80;

/// DVB-S2 normal FECFRAME length in bits.
const NORMAL_FECFRAME_BITS: u64 = 64_800;

/// Symbols per DVB-S2 slot, also the PL header length.
const SLOT_SYMBOLS: u64 = 90;

/// Pilot block length and spacing in slots.
const PILOT_BLOCK_SYMBOLS: u64 = 36;
const PILOT_SPACING_SLOTS: u64 = 16;

/// Payload bits carried per group of transmitted symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    pub payload_bits: u64,
    pub symbols: u64,
}

impl FrameBudget {
    /// Frame budget for a modulation, FEC and pilot setting.
    pub fn new(modulation: Modulation, fec: FecRate, pilots: bool) -> CapacityResult<Self> {
        if !modulation.supports(fec) {
            return Err(CapacityError::UnsupportedCombination { modulation, fec });
        }
        let bits_per_symbol = u64::from(modulation.bits_per_symbol());

        match modulation.standard() {
            DvbStandard::DvbS => {
                // Reed-Solomon 188/204 after the convolutional code.
                let (num, den) = fec.ratio();
                Ok(Self {
                    payload_bits: 188 * bits_per_symbol * u64::from(num),
                    symbols: 204 * u64::from(den),
                })
            }
            DvbStandard::DvbS2 => {
                let kbch = kbch_normal(fec)
                    .ok_or(CapacityError::UnsupportedCombination { modulation, fec })?;
                let slots = NORMAL_FECFRAME_BITS / bits_per_symbol / SLOT_SYMBOLS;
                let mut symbols = SLOT_SYMBOLS * (slots + 1);
                if pilots {
                    symbols += PILOT_BLOCK_SYMBOLS * ((slots - 1) / PILOT_SPACING_SLOTS);
                }
                Ok(Self {
                    payload_bits: kbch - BB_HEADER_BITS,
                    symbols,
                })
            }
        }
    }

    /// Budget for the parameters' modulation, FEC and pilots.
    pub fn for_params(params: &TransmissionParameters) -> CapacityResult<Self> {
        let pilots = params.pilots && params.modulation.standard() == DvbStandard::DvbS2;
        Self::new(params.modulation, params.fec, pilots)
    }

    /// Multiplex rate in bps at a symbol rate, rounded down.
    pub fn rate_bps(&self, symbol_rate: u32) -> u64 {
        let bits = u128::from(symbol_rate) * u128::from(self.payload_bits);
        (bits / u128::from(self.symbols)) as u64
    }
}

/// BCH-uncoded block size of a normal FECFRAME.
fn kbch_normal(fec: FecRate) -> Option<u64> {
    let kbch = match fec {
        FecRate::R1_4 => 16_008,
        FecRate::R1_3 => 21_408,
        FecRate::R2_5 => 25_728,
        FecRate::R1_2 => 32_208,
        FecRate::R3_5 => 38_688,
        FecRate::R2_3 => 43_040,
        FecRate::R3_4 => 48_408,
        FecRate::R4_5 => 51_648,
        FecRate::R5_6 => 53_840,
        FecRate::R8_9 => 57_472,
        FecRate::R9_10 => 58_192,
        FecRate::R7_8 => return None,
    };
    Some(kbch)
}

/// Derive the multiplex rate the parameters carry.
pub fn derive_mux_rate(params: &TransmissionParameters) -> CapacityResult<u64> {
    let rate = FrameBudget::for_params(params)?.rate_bps(params.symbol_rate);
    debug!(
        modulation = %params.modulation,
        fec = %params.fec,
        symbol_rate = params.symbol_rate,
        rate,
        "Derived multiplex rate"
    );
    Ok(rate)
}

/// Tolerance around a derived rate.
pub fn mux_rate_tolerance(derived_bps: u64) -> u64 {
    (derived_bps.saturating_mul(TOLERANCE_PPM) / 1_000_000).max(1)
}

/// Check an entered rate against the derived one. Returns the derived rate.
pub fn validate_mux_rate(entered_bps: u64, params: &TransmissionParameters) -> CapacityResult<u64> {
    let derived_bps = derive_mux_rate(params)?;
    let tolerance_bps = mux_rate_tolerance(derived_bps);
    if entered_bps.abs_diff(derived_bps) > tolerance_bps {
        return Err(CapacityError::ParameterMismatch {
            entered_bps,
            derived_bps,
            tolerance_bps,
        });
    }
    Ok(derived_bps)
}

/// The multiplex rate a broadcast runs at: derived for auto, the validated entry for manual.
pub fn effective_mux_rate(params: &TransmissionParameters) -> CapacityResult<u64> {
    match params.mux_rate {
        MuxRateSetting::Auto => derive_mux_rate(params),
        MuxRateSetting::Manual { bps } => validate_mux_rate(bps, params).map(|_| bps),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn params(modulation: Modulation, fec: FecRate, symbol_rate: u32) -> TransmissionParameters {
        TransmissionParameters {
            modulation,
            fec,
            symbol_rate,
            ..Default::default()
        }
    }

    #[test]
    fn test_dvbs_known_rates() {
        let p = params(Modulation::DvbsQpsk, FecRate::R3_4, 27_500_000);
        assert_eq!(derive_mux_rate(&p).unwrap(), 38_014_705);

        let p = params(Modulation::DvbsQpsk, FecRate::R2_3, 27_500_000);
        assert_eq!(derive_mux_rate(&p).unwrap(), 33_790_849);
    }

    #[test]
    fn test_dvbs2_frame_lengths() {
        let qpsk = FrameBudget::new(Modulation::Dvbs2Qpsk, FecRate::R3_4, false).unwrap();
        assert_eq!(qpsk.symbols, 32_490);
        assert_eq!(qpsk.payload_bits, 48_328);

        let qpsk = FrameBudget::new(Modulation::Dvbs2Qpsk, FecRate::R3_4, true).unwrap();
        assert_eq!(qpsk.symbols, 33_282);

        let psk8 = FrameBudget::new(Modulation::Dvbs2Psk8, FecRate::R2_3, true).unwrap();
        assert_eq!(psk8.symbols, 21_690 + 14 * 36);
    }

    #[test]
    fn test_pilots_ignored_for_dvbs() {
        let mut p = params(Modulation::DvbsQpsk, FecRate::R1_2, 10_000_000);
        let without = derive_mux_rate(&p).unwrap();
        p.pilots = true;
        assert_eq!(derive_mux_rate(&p).unwrap(), without);
    }

    #[test]
    fn test_unsupported_combination() {
        let p = params(Modulation::Dvbs2Qpsk, FecRate::R7_8, 27_500_000);
        assert!(matches!(
            derive_mux_rate(&p),
            Err(CapacityError::UnsupportedCombination { .. })
        ));

        let p = params(Modulation::Dvbs2Apsk32, FecRate::R1_2, 27_500_000);
        assert!(derive_mux_rate(&p).is_err());
    }

    #[test]
    fn test_validate_tolerance() {
        let p = params(Modulation::DvbsQpsk, FecRate::R3_4, 27_500_000);
        let derived = derive_mux_rate(&p).unwrap();
        let tolerance = mux_rate_tolerance(derived);
        assert_eq!(tolerance, 38_014);

        assert!(validate_mux_rate(derived + tolerance, &p).is_ok());
        assert!(validate_mux_rate(derived - tolerance, &p).is_ok());
        match validate_mux_rate(derived + tolerance + 1, &p) {
            Err(CapacityError::ParameterMismatch { derived_bps, .. }) => {
                assert_eq!(derived_bps, derived)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_minimum_tolerance() {
        assert_eq!(mux_rate_tolerance(0), 1);
        assert_eq!(mux_rate_tolerance(999), 1);
    }

    #[test]
    fn test_effective_rate() {
        let mut p = params(Modulation::DvbsQpsk, FecRate::R3_4, 27_500_000);
        assert_eq!(effective_mux_rate(&p).unwrap(), 38_014_705);

        p.mux_rate = MuxRateSetting::Manual { bps: 38_000_000 };
        assert_eq!(effective_mux_rate(&p).unwrap(), 38_000_000);

        p.mux_rate = MuxRateSetting::Manual { bps: 30_000_000 };
        assert!(effective_mux_rate(&p).is_err());
    }

    #[derive(Debug, Clone)]
    struct ValidParams(TransmissionParameters);

    impl Arbitrary for ValidParams {
        fn arbitrary(g: &mut Gen) -> Self {
            let modulation = *g.choose(&Modulation::ALL).unwrap();
            let fec = *g.choose(modulation.fec_rates()).unwrap();
            let span = 72_000_000 - 100_000;
            let symbol_rate = 100_000 + u32::arbitrary(g) % (span + 1);
            ValidParams(TransmissionParameters {
                modulation,
                fec,
                symbol_rate,
                pilots: bool::arbitrary(g),
                ..Default::default()
            })
        }
    }

    #[quickcheck]
    fn prop_derived_rate_always_validates(p: ValidParams) -> bool {
        let derived = derive_mux_rate(&p.0).unwrap();
        derived > 0 && validate_mux_rate(derived, &p.0).ok() == Some(derived)
    }
}
