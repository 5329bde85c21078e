//! Service bitrate demand against channel capacity.

use serde::Serialize;
use tracing::{info, instrument, warn};

use uplink_model::{ServiceId, Session, TransmissionParameters};

use crate::error::CapacityError;
use crate::formula::{derive_mux_rate, effective_mux_rate};
use crate::CapacityResult;

/// Bitrate reserved for signalling on top of the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignallingOverhead {
    /// PAT, NIT, SDT and EIT tables.
    pub table_bps: u64,

    /// Time signal injection, matching the injector's bitrate cap.
    pub time_signal_bps: u64,

    /// PMT and PCR per service.
    pub per_service_bps: u64,
}

impl Default for SignallingOverhead {
    fn default() -> Self {
        Self {
            table_bps: 120_000,
            time_signal_bps: 50_000,
            per_service_bps: 15_000,
        }
    }
}

impl SignallingOverhead {
    /// Total overhead for a number of services.
    pub fn total_bps(&self, services: usize) -> u64 {
        self.table_bps + self.time_signal_bps + self.per_service_bps * services as u64
    }
}

/// Target bitrate of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceDemand {
    pub service_id: ServiceId,
    pub bitrate_bps: u64,
}

/// Outcome of a capacity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityReport {
    /// Rate implied by modulation, FEC and symbol rate.
    pub derived_bps: u64,

    /// Services plus signalling.
    pub required_bps: u64,

    /// Rate the multiplexer will run at.
    pub mux_rate_bps: u64,

    /// Spare capacity; negative when over budget.
    pub headroom_bps: i64,
}

/// Per-service demand, in session order.
pub fn demands_for(session: &Session) -> Vec<ServiceDemand> {
    session
        .services
        .iter()
        .map(|service| ServiceDemand {
            service_id: service.id,
            bitrate_bps: service.target_bitrate_bps(),
        })
        .collect()
}

/// Check that the demands plus overhead fit the channel.
///
/// A manual multiplex rate is validated first; the check then runs against it.
pub fn check(
    demands: &[ServiceDemand],
    overhead: &SignallingOverhead,
    params: &TransmissionParameters,
) -> CapacityResult<CapacityReport> {
    let derived_bps = derive_mux_rate(params)?;
    let mux_rate_bps = effective_mux_rate(params)?;
    let required_bps =
        demands.iter().map(|d| d.bitrate_bps).sum::<u64>() + overhead.total_bps(demands.len());

    let report = CapacityReport {
        derived_bps,
        required_bps,
        mux_rate_bps,
        headroom_bps: mux_rate_bps as i64 - required_bps as i64,
    };

    if required_bps > mux_rate_bps {
        warn!(
            required_bps,
            available_bps = mux_rate_bps,
            "Services exceed channel capacity"
        );
        return Err(CapacityError::CapacityExceeded {
            required_bps,
            available_bps: mux_rate_bps,
            report,
        });
    }
    Ok(report)
}

/// Check a whole session with the default overhead allowance.
#[instrument(name = "capacity_check", skip(session), fields(services = session.services.len()))]
pub fn check_session(session: &Session) -> CapacityResult<CapacityReport> {
    let report = check(
        &demands_for(session),
        &SignallingOverhead::default(),
        &session.transmission,
    )?;
    info!(
        mux_rate_bps = report.mux_rate_bps,
        headroom_bps = report.headroom_bps,
        "Capacity check passed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uplink_model::{FecRate, Modulation, MuxRateSetting, Service};

    fn params_11m() -> TransmissionParameters {
        TransmissionParameters {
            modulation: Modulation::DvbsQpsk,
            fec: FecRate::R1_2,
            symbol_rate: 12_000_000,
            ..Default::default()
        }
    }

    fn demand(id: u16, bitrate_bps: u64) -> ServiceDemand {
        ServiceDemand {
            service_id: ServiceId(id),
            bitrate_bps,
        }
    }

    #[test]
    fn test_two_services_exceed_small_multiplex() {
        let params = params_11m();
        assert_eq!(derive_mux_rate(&params).unwrap(), 11_058_823);

        let demands = [demand(1, 6_000_000), demand(2, 6_000_000)];
        match check(&demands, &SignallingOverhead::default(), &params) {
            Err(CapacityError::CapacityExceeded {
                required_bps,
                available_bps,
                report,
            }) => {
                assert_eq!(required_bps, 12_200_000);
                assert_eq!(available_bps, 11_058_823);
                assert_eq!(report.headroom_bps, 11_058_823 - 12_200_000);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_single_service_fits() {
        let report = check(
            &[demand(1, 6_000_000)],
            &SignallingOverhead::default(),
            &params_11m(),
        )
        .unwrap();
        assert_eq!(
            report,
            CapacityReport {
                derived_bps: 11_058_823,
                required_bps: 6_185_000,
                mux_rate_bps: 11_058_823,
                headroom_bps: 4_873_823,
            }
        );
    }

    #[test]
    fn test_manual_rate_is_used_after_validation() {
        let mut params = params_11m();
        params.mux_rate = MuxRateSetting::Manual { bps: 11_050_000 };
        let report = check(&[], &SignallingOverhead::default(), &params).unwrap();
        assert_eq!(report.mux_rate_bps, 11_050_000);
        assert_eq!(report.derived_bps, 11_058_823);

        params.mux_rate = MuxRateSetting::Manual { bps: 12_000_000 };
        assert!(matches!(
            check(&[], &SignallingOverhead::default(), &params),
            Err(CapacityError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_session_demands() {
        let mut session = Session::default();
        session.add_service(Service::new(1, "One", "P")).unwrap();
        session.add_service(Service::new(2, "Two", "P")).unwrap();

        let demands = demands_for(&session);
        assert_eq!(demands.len(), 2);
        assert_eq!(demands[0].service_id, ServiceId(1));
        assert_eq!(
            demands[0].bitrate_bps,
            session.services[0].target_bitrate_bps()
        );
        assert!(check_session(&session).is_ok());
    }
}
