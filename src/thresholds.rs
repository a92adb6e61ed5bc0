// Threshold configuration - every cutoff, weight and boost the stages use
//
// Persisted as a single versioned record in the store (JSON payload in a
// singleton row), read once at the start of every run and passed by
// reference into each stage. Never a process-wide singleton: concurrent
// test runs with different thresholds must not interfere.
//
// The migration seeds the record with these defaults so a fresh database
// is runnable; a missing or malformed record at run time is a fatal
// configuration error - every downstream rule depends on it.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Mean Gregorian month length, used to turn recency days into months
pub const DAYS_PER_MONTH: f64 = 30.44;

/// Versioned threshold record. All fields are tunables, not derived
/// constants - the boost schedule in particular is a configuration
/// decision and is applied identically by the Value Tier Scorer and the
/// Pyramid Tier Assigner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Record version, bumped whenever operators change a value
    pub version: u32,

    // Lifecycle cascade
    /// Customers within this many days of their first booking are New
    pub new_days: i64,
    /// Months since last booking at or under this are Active
    pub active_months: f64,
    /// At-risk band: (at_risk_from_months, at_risk_to_months]
    pub at_risk_from_months: f64,
    pub at_risk_to_months: f64,

    // Feature aggregation
    /// Trailing window for frequency/revenue metrics
    pub window_months: u32,
    /// Line-level margin is not modeled; margin = revenue x this
    pub default_margin_pct: f64,
    /// Wash bookings above this count mark a fleet relationship
    pub fleet_wash_min: u32,

    // Weighted RFM
    pub weight_recency: f64,
    pub weight_frequency: f64,
    pub weight_monetary: f64,

    // Stickiness boosts, additive fractions of the RFM score
    pub boost_storage: f64,
    pub boost_fleet: f64,
    pub boost_multi_service: f64,

    // Value tier cuts (population share, descending by score)
    pub high_value_pct: f64,
    pub mid_value_pct: f64,

    // Pyramid tier cascade
    pub champion_min_composite: f64,
    pub loyalist_min_composite_active: f64,
    pub loyalist_min_composite_at_risk: f64,
    pub engaged_min_composite_winback: f64,
    pub engaged_min_lifetime_bookings: u32,
    pub prospect_max_tenure_days: i64,
    /// Single tire order at or above this (NOK) marks a high-value purchaser
    pub high_value_tire_order_nok: f64,

    // Fleet-size segment buckets: SMB 1..=smb_max, Large ..=large_max,
    // Enterprise above
    pub smb_max_fleet: u32,
    pub large_max_fleet: u32,

    // Dormant pool
    /// Churned customers whose last booking is within this many days are
    /// Salvageable, older ones Transient
    pub salvageable_max_days: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            version: 1,
            new_days: 30,
            active_months: 7.0,
            at_risk_from_months: 7.0,
            at_risk_to_months: 9.0,
            window_months: 24,
            default_margin_pct: 0.30,
            fleet_wash_min: 2,
            weight_recency: 0.30,
            weight_frequency: 0.40,
            weight_monetary: 0.30,
            boost_storage: 0.15,
            boost_fleet: 0.10,
            boost_multi_service: 0.05,
            high_value_pct: 0.20,
            mid_value_pct: 0.30,
            champion_min_composite: 0.75,
            loyalist_min_composite_active: 0.50,
            loyalist_min_composite_at_risk: 0.70,
            engaged_min_composite_winback: 0.50,
            engaged_min_lifetime_bookings: 2,
            prospect_max_tenure_days: 180,
            high_value_tire_order_nok: 8000.0,
            smb_max_fleet: 19,
            large_max_fleet: 49,
            salvageable_max_days: 730,
        }
    }
}

impl ThresholdConfig {
    /// Fail-fast sanity check, run before any stage touches data.
    ///
    /// A malformed threshold record must abort the whole run and leave
    /// prior feature/segment data untouched.
    pub fn validate(&self) -> Result<()> {
        let weight_sum = self.weight_recency + self.weight_frequency + self.weight_monetary;
        if (weight_sum - 1.0).abs() > 1e-6 {
            bail!("RFM weights must sum to 1.0, got {weight_sum}");
        }
        if self.weight_recency < 0.0 || self.weight_frequency < 0.0 || self.weight_monetary < 0.0 {
            bail!("RFM weights must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.high_value_pct)
            || !(0.0..=1.0).contains(&self.mid_value_pct)
            || self.high_value_pct + self.mid_value_pct > 1.0
        {
            bail!(
                "value tier percentiles out of range: high={} mid={}",
                self.high_value_pct,
                self.mid_value_pct
            );
        }
        if self.at_risk_from_months > self.at_risk_to_months {
            bail!(
                "at-risk band is empty: from {} > to {}",
                self.at_risk_from_months,
                self.at_risk_to_months
            );
        }
        if self.active_months > self.at_risk_from_months {
            bail!(
                "active window {} overlaps at-risk band starting at {}",
                self.active_months,
                self.at_risk_from_months
            );
        }
        if self.new_days < 0 || self.prospect_max_tenure_days < 0 || self.salvageable_max_days < 0 {
            bail!("day thresholds must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.default_margin_pct) {
            bail!("default margin {} must be in [0,1]", self.default_margin_pct);
        }
        if self.smb_max_fleet >= self.large_max_fleet {
            bail!(
                "fleet buckets must be ordered: smb_max {} >= large_max {}",
                self.smb_max_fleet,
                self.large_max_fleet
            );
        }
        if self.window_months == 0 {
            bail!("aggregation window must be at least one month");
        }
        for (name, value) in [
            ("champion_min_composite", self.champion_min_composite),
            (
                "loyalist_min_composite_active",
                self.loyalist_min_composite_active,
            ),
            (
                "loyalist_min_composite_at_risk",
                self.loyalist_min_composite_at_risk,
            ),
            (
                "engaged_min_composite_winback",
                self.engaged_min_composite_winback,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} {value} must be in [0,1]");
            }
        }
        Ok(())
    }

    /// Trailing aggregation window in days
    pub fn window_days(&self) -> i64 {
        (self.window_months as f64 * DAYS_PER_MONTH).round() as i64
    }
}

/// Days-to-months conversion used by the lifecycle cascade
pub fn months_from_days(days: i64) -> f64 {
    days as f64 / DAYS_PER_MONTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ThresholdConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.weight_frequency = 0.90;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn rejects_inverted_at_risk_band() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.at_risk_from_months = 12.0;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn rejects_overlapping_tier_percentiles() {
        let mut thresholds = ThresholdConfig::default();
        thresholds.high_value_pct = 0.60;
        thresholds.mid_value_pct = 0.50;
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn eight_months_in_days_lands_in_default_at_risk_band() {
        // 240 days is about 7.9 months - inside (7, 9]
        let months = months_from_days(240);
        assert!(months > 7.0 && months <= 9.0);
    }

    #[test]
    fn unknown_payload_fields_fall_back_to_defaults() {
        // serde(default) keeps old payloads readable after fields are added
        let payload = r#"{"version": 3, "new_days": 14}"#;
        let thresholds: ThresholdConfig = serde_json::from_str(payload).unwrap();
        assert_eq!(thresholds.version, 3);
        assert_eq!(thresholds.new_days, 14);
        assert_eq!(thresholds.active_months, 7.0);
    }
}
