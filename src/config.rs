//! Loop configuration parameters
//!
//! All tunable parameters for the closed-loop control engine.
//! Values can be overridden by the host application's preference layer.

use serde::{Deserialize, Serialize};

/// Core loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    // --- SMB safety ---
    /// Minimum spacing between two boluses (minutes).  A bolus delivered
    /// within this window forces `smb = 0` for the current cycle.
    pub min_smb_interval_min: u32,

    // --- Carb suggestions ---
    /// Lookback window (minutes): a bolus or carb entry within it
    /// suppresses a fresh carb-required notification.
    pub carb_lookback_min: u32,

    // --- Retry / debounce ---
    /// Delay before the whole invocation cycle is retried after a failed
    /// bolus command (milliseconds).
    pub smb_retry_delay_ms: u64,
    /// Debounce window for the device-status snapshot write (milliseconds).
    pub status_debounce_ms: u64,

    // --- Staleness ---
    /// A dosing result older than this is omitted from the device-status
    /// snapshot (milliseconds).
    pub result_staleness_ms: u64,

    // --- Command queue polling ---
    /// Interval between command-queue idle checks (milliseconds).
    pub queue_poll_interval_ms: u64,
    /// Give up waiting for an idle command queue after this long (milliseconds).
    pub queue_poll_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            // SMB safety
            min_smb_interval_min: 3,

            // Carb suggestions
            carb_lookback_min: 15,

            // Retry / debounce
            smb_retry_delay_ms: 60_000,  // 1 min
            status_debounce_ms: 5_000,   // 5 s

            // Staleness
            result_staleness_ms: 300_000, // 5 min

            // Command queue polling
            queue_poll_interval_ms: 1_000,  // 1 Hz
            queue_poll_timeout_ms: 120_000, // 2 min
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = LoopConfig::default();
        assert!(c.min_smb_interval_min > 0);
        assert!(c.carb_lookback_min > 0);
        assert!(c.smb_retry_delay_ms > 0);
        assert!(c.status_debounce_ms > 0);
        assert!(c.result_staleness_ms > c.status_debounce_ms);
        assert!(c.queue_poll_interval_ms > 0);
    }

    #[test]
    fn serde_roundtrip() {
        let c = LoopConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: LoopConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.min_smb_interval_min, c2.min_smb_interval_min);
        assert_eq!(c.smb_retry_delay_ms, c2.smb_retry_delay_ms);
        assert_eq!(c.queue_poll_timeout_ms, c2.queue_poll_timeout_ms);
    }

    #[test]
    fn poll_interval_below_timeout_invariant() {
        let c = LoopConfig::default();
        assert!(
            c.queue_poll_interval_ms < c.queue_poll_timeout_ms,
            "poll interval must be shorter than the overall timeout"
        );
    }

    #[test]
    fn debounce_below_staleness_invariant() {
        let c = LoopConfig::default();
        assert!(
            c.status_debounce_ms < c.result_staleness_ms,
            "a debounced snapshot must still see a fresh result"
        );
    }

    #[test]
    fn postcard_roundtrip() {
        let c = LoopConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: LoopConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.min_smb_interval_min, c2.min_smb_interval_min);
        assert_eq!(c.result_staleness_ms, c2.result_staleness_ms);
    }
}
