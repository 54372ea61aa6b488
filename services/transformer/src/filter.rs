//! Stage-1 measurement sanity checks.
//!
//! Checks run in a fixed order; the first failure wins and names the drop
//! reason so the worker can bump the matching counter.  Order:
//!
//! 1. BSSID present and MAC-shaped
//! 2. Coordinates in range and not (0, 0)
//! 3. RSSI within [-100, 0]
//! 4. GPS accuracy within the configured threshold
//! 5. Timestamp within [2010-01-01, now + 1 day]
//!
//! An optional mobile-hotspot policy then matches the BSSID's OUI against an
//! injected set and applies FLAG / EXCLUDE / LOG_ONLY.

use crate::config::{FilterConfig, HotspotAction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use wt_protocol::{Measurement, bssid_oui, is_bssid};

/// 2010-01-01T00:00:00Z — nothing in the fleet predates this.
pub const MIN_PLAUSIBLE_TIMESTAMP_MS: i64 = 1_262_304_000_000;
/// Allowed clock skew into the future.
pub const MAX_FUTURE_SKEW_MS: i64 = 86_400_000;

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Bssid,
    Coordinates,
    Rssi,
    Accuracy,
    Timestamp,
    MobileHotspot,
}

// ---------------------------------------------------------------------------
// OUI set
// ---------------------------------------------------------------------------

/// Membership test over OUIs (6 uppercase hex digits).  The list source is
/// deployment-specific and injected.
pub trait OuiSet: Send + Sync {
    fn contains(&self, oui: &str) -> bool;
}

/// An [`OuiSet`] backed by a fixed in-memory set (config-provided list).
#[derive(Debug, Default)]
pub struct StaticOuiSet {
    ouis: HashSet<String>,
}

impl StaticOuiSet {
    pub fn new<I: IntoIterator<Item = String>>(ouis: I) -> Self {
        StaticOuiSet {
            ouis: ouis.into_iter().map(|o| o.to_ascii_uppercase()).collect(),
        }
    }
}

impl OuiSet for StaticOuiSet {
    fn contains(&self, oui: &str) -> bool {
        self.ouis.contains(oui)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Mobile-hotspot policy: the action plus the OUI set it consults.
pub struct HotspotPolicy {
    pub action: HotspotAction,
    pub ouis: Arc<dyn OuiSet>,
}

/// The configured stage-1 filter.
pub struct SanityFilter {
    accuracy_threshold_m: f64,
    hotspot: Option<HotspotPolicy>,
}

impl SanityFilter {
    pub fn new(accuracy_threshold_m: f64, hotspot: Option<HotspotPolicy>) -> Self {
        SanityFilter {
            accuracy_threshold_m,
            hotspot,
        }
    }

    /// Build from config, backing the hotspot policy with the configured
    /// static OUI list.
    pub fn from_config(cfg: &FilterConfig) -> Self {
        let hotspot = cfg.mobile_hotspot.enabled.then(|| HotspotPolicy {
            action: cfg.mobile_hotspot.action,
            ouis: Arc::new(StaticOuiSet::new(cfg.mobile_hotspot.ouis.iter().cloned()))
                as Arc<dyn OuiSet>,
        });
        SanityFilter::new(cfg.accuracy_threshold_m, hotspot)
    }

    pub fn accuracy_threshold_m(&self) -> f64 {
        self.accuracy_threshold_m
    }

    /// Run all checks on one candidate.  `now_ms` is the wall clock used for
    /// the plausibility window.
    pub fn apply(&self, mut m: Measurement, now_ms: i64) -> Result<Measurement, DropReason> {
        let bssid = match m.bssid.as_deref() {
            Some(b) if is_bssid(b) => b.to_owned(),
            _ => return Err(DropReason::Bssid),
        };

        match (m.latitude, m.longitude) {
            (Some(lat), Some(lon))
                if lat.abs() <= 90.0 && lon.abs() <= 180.0 && !(lat == 0.0 && lon == 0.0) => {}
            _ => return Err(DropReason::Coordinates),
        }

        match m.rssi {
            Some(rssi) if (-100..=0).contains(&rssi) => {}
            _ => return Err(DropReason::Rssi),
        }

        match m.location_accuracy {
            Some(acc) if acc.is_finite() && acc >= 0.0 && acc <= self.accuracy_threshold_m => {}
            _ => return Err(DropReason::Accuracy),
        }

        match m.measurement_timestamp {
            Some(ts)
                if ts >= MIN_PLAUSIBLE_TIMESTAMP_MS && ts <= now_ms + MAX_FUTURE_SKEW_MS => {}
            _ => return Err(DropReason::Timestamp),
        }

        if let Some(policy) = &self.hotspot {
            let oui = bssid_oui(&bssid).unwrap_or_default();
            if policy.ouis.contains(&oui) {
                match policy.action {
                    HotspotAction::Exclude => return Err(DropReason::MobileHotspot),
                    HotspotAction::Flag => {
                        m.is_mobile_hotspot = Some(true);
                        m.quality_score *= 0.5;
                    }
                    HotspotAction::LogOnly => {
                        info!(bssid = %bssid, oui = %oui, "mobile hotspot observed");
                    }
                }
            }
        }

        Ok(m)
    }
}
