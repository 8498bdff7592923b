//! Device-status snapshot builder.
//!
//! A snapshot is the audit/telemetry record of one control iteration:
//! what the algorithm suggested, what the pump actually enacted, the
//! insulin-on-board at the time, and the pump's own status.  Snapshots are
//! debounced by the caller (see
//! [`LoopService`](crate::app::service::LoopService)) so bursts of triggers
//! coalesce into one write.

use serde::Serialize;

use crate::app::ports::{IobSource, IobValue, PumpPort, PumpStatusSummary};
use crate::config::LoopConfig;
use crate::dosing::LastRun;

/// The suggestion part of a snapshot — the raw algorithm output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedDose {
    pub timestamp_ms: u64,
    pub rate: Option<f64>,
    pub percent: Option<u16>,
    pub duration_min: u32,
    pub smb: f64,
    pub source: String,
    pub reason: String,
}

/// The enacted part — present only when the temp basal was actually set.
/// Carries the realized values alongside the requested ones so audit can
/// compare them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnactedDose {
    pub timestamp_ms: u64,
    pub requested_rate: Option<f64>,
    pub enacted_rate: Option<f64>,
    pub requested_duration_min: u32,
    pub enacted_duration_min: Option<u32>,
    pub requested_smb: f64,
    pub enacted_smb: Option<f64>,
}

/// Point-in-time snapshot for audit/telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub created_at_ms: u64,
    /// Omitted when the raw result is older than the staleness window.
    pub suggested: Option<SuggestedDose>,
    /// Present only when the temp basal was enacted.
    pub enacted: Option<EnactedDose>,
    /// IOB at the last run, or an IOB-over-DIA projection when no run has
    /// occurred yet.
    pub iob: Vec<IobValue>,
    pub pump: PumpStatusSummary,
}

impl DeviceStatus {
    /// JSON form for upload/telemetry adapters.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Assemble a snapshot from the most recent run.
pub fn build_device_status(
    last_run: Option<&LastRun>,
    cfg: &LoopConfig,
    iob: &dyn IobSource,
    pump: &dyn PumpPort,
    now_ms: u64,
) -> DeviceStatus {
    let suggested = last_run
        .filter(|lr| now_ms.saturating_sub(lr.request.timestamp_ms) <= cfg.result_staleness_ms)
        .map(|lr| SuggestedDose {
            timestamp_ms: lr.request.timestamp_ms,
            rate: lr.request.rate,
            percent: lr.request.percent,
            duration_min: lr.request.duration_min,
            smb: lr.request.smb,
            source: lr.request.source.clone(),
            reason: lr.request.reason.clone(),
        });

    let enacted = last_run
        .filter(|lr| lr.tbr_set_by_pump())
        .map(|lr| {
            let outcome = lr.tbr_outcome.as_ref();
            EnactedDose {
                timestamp_ms: lr.tbr_enacted_at.unwrap_or(lr.timestamp_ms),
                requested_rate: lr.constrained.rate,
                enacted_rate: outcome.and_then(|o| o.rate),
                requested_duration_min: lr.constrained.duration_min,
                enacted_duration_min: outcome.and_then(|o| o.duration_min),
                requested_smb: lr.constrained.smb,
                enacted_smb: lr.smb_outcome.as_ref().and_then(|o| o.smb),
            }
        });

    let iob_values = match last_run {
        Some(lr) => vec![iob.iob_at(lr.timestamp_ms)],
        None => iob.iob_over_dia(),
    };

    DeviceStatus {
        created_at_ms: now_ms,
        suggested,
        enacted,
        iob: iob_values,
        pump: pump.status_summary(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::commands::CommandResult;
    use crate::app::ports::{PumpCapabilities, TempBasalStyle};
    use crate::dosing::DosingResult;

    struct StubIob;

    impl IobSource for StubIob {
        fn iob_at(&self, ts_ms: u64) -> IobValue {
            IobValue {
                ts_ms,
                iob_units: 1.5,
                basal_iob_units: 0.4,
            }
        }
        fn iob_over_dia(&self) -> Vec<IobValue> {
            (0u32..5)
                .map(|h| IobValue {
                    ts_ms: u64::from(h) * 3_600_000,
                    iob_units: 2.0 - f64::from(h) * 0.4,
                    basal_iob_units: 0.0,
                })
                .collect()
        }
    }

    struct StubPump;

    impl PumpPort for StubPump {
        fn is_suspended(&self) -> bool {
            false
        }
        fn base_basal_rate(&self) -> Option<f64> {
            Some(0.9)
        }
        fn capabilities(&self) -> PumpCapabilities {
            PumpCapabilities {
                temp_basal_style: TempBasalStyle::Absolute,
                supports_extended_bolus: false,
            }
        }
        fn is_extended_bolus_active(&self) -> bool {
            false
        }
        fn status_summary(&self) -> PumpStatusSummary {
            PumpStatusSummary {
                model: "stub".into(),
                status: "running".into(),
                battery_percent: Some(80),
                reservoir_units: Some(120.0),
            }
        }
    }

    fn dosing(ts: u64) -> DosingResult {
        DosingResult {
            timestamp_ms: ts,
            source: "test-algo".into(),
            reason: "test".into(),
            rate: Some(1.1),
            percent: None,
            use_percent: false,
            duration_min: 30,
            smb: 0.2,
            temp_basal_requested: true,
            bolus_requested: true,
            carbs_required: false,
            carbs_req_g: 0,
            carbs_req_within_min: 0,
            deliver_at_ms: ts,
        }
    }

    #[test]
    fn fresh_result_is_included() {
        let lr = LastRun::new(dosing(100_000), dosing(100_000), "test-algo", 100_000);
        let s = build_device_status(Some(&lr), &LoopConfig::default(), &StubIob, &StubPump, 160_000);
        let suggested = s.suggested.expect("fresh result must be present");
        assert_eq!(suggested.rate, Some(1.1));
        assert_eq!(s.iob.len(), 1);
        assert_eq!(s.iob[0].ts_ms, 100_000);
    }

    #[test]
    fn stale_result_is_omitted() {
        let lr = LastRun::new(dosing(0), dosing(0), "test-algo", 0);
        // 5 min + 1 ms later.
        let s = build_device_status(Some(&lr), &LoopConfig::default(), &StubIob, &StubPump, 300_001);
        assert!(s.suggested.is_none());
    }

    #[test]
    fn enacted_requires_pump_confirmation() {
        let mut lr = LastRun::new(dosing(1_000), dosing(1_000), "test-algo", 1_000);
        let s = build_device_status(Some(&lr), &LoopConfig::default(), &StubIob, &StubPump, 2_000);
        assert!(s.enacted.is_none(), "no enacted block without TBR enactment");

        lr.tbr_enacted_at = Some(1_500);
        lr.tbr_outcome = Some(CommandResult {
            rate: Some(1.0),
            duration_min: Some(30),
            ..CommandResult::enacted("ok")
        });
        let s = build_device_status(Some(&lr), &LoopConfig::default(), &StubIob, &StubPump, 2_000);
        let enacted = s.enacted.expect("enacted block after TBR enactment");
        assert_eq!(enacted.requested_rate, Some(1.1));
        assert_eq!(enacted.enacted_rate, Some(1.0));
        assert_eq!(enacted.timestamp_ms, 1_500);
    }

    #[test]
    fn no_run_projects_iob_over_dia() {
        let s = build_device_status(None, &LoopConfig::default(), &StubIob, &StubPump, 0);
        assert!(s.suggested.is_none());
        assert!(s.enacted.is_none());
        assert_eq!(s.iob.len(), 5);
    }

    #[test]
    fn json_shape_has_pump_block() {
        let s = build_device_status(None, &LoopConfig::default(), &StubIob, &StubPump, 0);
        let json = s.as_json();
        assert_eq!(json["pump"]["status"], "running");
        assert!(json["suggested"].is_null());
    }
}
