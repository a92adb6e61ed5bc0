// Value Tier Scorer - weighted RFM composite over the full population,
// cut into High/Mid/Low by configured percentiles
//
// Tiering is inherently population-relative: every score is a percentile
// rank against the current full population, so this stage needs all
// feature records before any single tier can be assigned. Percentile
// rank is the canonical normalization (robust to outliers); the boost
// schedule comes from the threshold record and is shared with the
// Pyramid Tier Assigner.

use crate::model::{FeatureRecord, ValueTier};
use crate::thresholds::ThresholdConfig;

/// Boosted RFM score for one customer, before any tier cut
#[derive(Debug, Clone)]
pub struct CustomerScore {
    pub user_group_id: String,
    /// Weighted RFM on the 0-100 scale
    pub rfm: f64,
    /// RFM with stickiness boosts applied
    pub boosted: f64,
}

/// Fraction of the population with a value <= `value`, over a slice
/// sorted ascending. Returns a value in (0, 1] for members of the slice.
pub fn percentile_rank(sorted: &[f64], value: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let at_or_below = sorted.partition_point(|x| *x <= value);
    at_or_below as f64 / sorted.len() as f64
}

/// Inverted rank for recency: fraction of the population with a value
/// >= `value` (fewer days since last booking scores higher).
fn percentile_rank_inverted(sorted: &[f64], value: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let below = sorted.partition_point(|x| *x < value);
    (sorted.len() - below) as f64 / sorted.len() as f64
}

/// Recency value used for ranking; customers with no bookings sort as
/// infinitely stale
fn recency_value(feature: &FeatureRecord) -> f64 {
    feature
        .recency_days
        .map(|d| d as f64)
        .unwrap_or(f64::INFINITY)
}

/// Compute the boosted RFM score for every customer in the population.
///
/// Normalization: percentile rank to 0-100 per dimension, recency
/// inverted. Composite: weighted sum per the threshold record. Boosts:
/// additive fractions of the RFM score for storage, fleet and
/// multi-service relationships.
pub fn score_population(
    features: &[FeatureRecord],
    thresholds: &ThresholdConfig,
) -> Vec<CustomerScore> {
    let mut recency_sorted: Vec<f64> = features.iter().map(recency_value).collect();
    let mut frequency_sorted: Vec<f64> = features.iter().map(|f| f.frequency_24m as f64).collect();
    let mut monetary_sorted: Vec<f64> = features.iter().map(|f| f.revenue_24m).collect();
    recency_sorted.sort_by(|a, b| a.total_cmp(b));
    frequency_sorted.sort_by(|a, b| a.total_cmp(b));
    monetary_sorted.sort_by(|a, b| a.total_cmp(b));

    features
        .iter()
        .map(|feature| {
            let recency_score = percentile_rank_inverted(&recency_sorted, recency_value(feature)) * 100.0;
            let frequency_score =
                percentile_rank(&frequency_sorted, feature.frequency_24m as f64) * 100.0;
            let monetary_score = percentile_rank(&monetary_sorted, feature.revenue_24m) * 100.0;

            let rfm = thresholds.weight_recency * recency_score
                + thresholds.weight_frequency * frequency_score
                + thresholds.weight_monetary * monetary_score;

            let mut boost = 0.0;
            if feature.is_storage_customer() {
                boost += thresholds.boost_storage;
            }
            if feature.is_fleet_customer(thresholds.fleet_wash_min) {
                boost += thresholds.boost_fleet;
            }
            if feature.is_multi_service() {
                boost += thresholds.boost_multi_service;
            }

            CustomerScore {
                user_group_id: feature.user_group_id.clone(),
                rfm,
                boosted: rfm * (1.0 + boost),
            }
        })
        .collect()
}

/// Rank boosted scores descending and cut by the configured percentiles.
///
/// Ordering is made fully deterministic by breaking score ties on the
/// customer key, so reruns over identical inputs always produce identical
/// tiers regardless of input order.
pub fn assign_value_tiers(
    scores: &[CustomerScore],
    thresholds: &ThresholdConfig,
) -> Vec<(String, ValueTier)> {
    let mut ranked: Vec<&CustomerScore> = scores.iter().collect();
    ranked.sort_by(|a, b| {
        b.boosted
            .total_cmp(&a.boosted)
            .then_with(|| a.user_group_id.cmp(&b.user_group_id))
    });

    let n = ranked.len();
    let high_count = (n as f64 * thresholds.high_value_pct).round() as usize;
    let mid_count = (n as f64 * thresholds.mid_value_pct).round() as usize;

    ranked
        .iter()
        .enumerate()
        .map(|(rank, score)| {
            let tier = if rank < high_count {
                ValueTier::High
            } else if rank < high_count + mid_count {
                ValueTier::Mid
            } else {
                ValueTier::Low
            };
            (score.user_group_id.clone(), tier)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CategoryBreakdown;
    use chrono::Utc;

    fn feature(id: &str, recency: i64, frequency: u32, revenue: f64) -> FeatureRecord {
        FeatureRecord {
            user_group_id: id.to_string(),
            recency_days: Some(recency),
            frequency_24m: frequency,
            revenue_24m: revenue,
            margin_24m: 0.0,
            discount_share_24m: 0.0,
            storage_active: false,
            categories: CategoryBreakdown::default(),
            tags: vec![],
            tenure_days: Some(400),
            lifetime_bookings: frequency,
            largest_tire_order: None,
            first_booking_at: None,
            last_booking_at: None,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn recency_rank_is_inverted() {
        let features = vec![
            feature("fresh", 5, 1, 100.0),
            feature("stale", 500, 1, 100.0),
        ];
        let thresholds = ThresholdConfig::default();
        let scores = score_population(&features, &thresholds);
        let fresh = scores.iter().find(|s| s.user_group_id == "fresh").unwrap();
        let stale = scores.iter().find(|s| s.user_group_id == "stale").unwrap();
        assert!(fresh.rfm > stale.rfm);
    }

    #[test]
    fn storage_boost_lifts_rfm_by_fifteen_percent() {
        let thresholds = ThresholdConfig::default();
        let plain = feature("plain", 10, 3, 1000.0);
        let mut sticky = feature("sticky", 10, 3, 1000.0);
        sticky.storage_active = true;

        let scores = score_population(&[plain, sticky], &thresholds);
        let plain_score = &scores[0];
        let sticky_score = &scores[1];
        assert_eq!(plain_score.rfm, sticky_score.rfm);
        let expected = sticky_score.rfm * (1.0 + thresholds.boost_storage);
        assert!((sticky_score.boosted - expected).abs() < 1e-9);
        assert!((plain_score.boosted - plain_score.rfm).abs() < 1e-9);
    }

    #[test]
    fn default_cut_is_twenty_thirty_fifty() {
        let features: Vec<FeatureRecord> = (0..100)
            .map(|i| feature(&format!("c{i:03}"), 400 - i, i as u32, i as f64 * 50.0))
            .collect();
        let thresholds = ThresholdConfig::default();
        let scores = score_population(&features, &thresholds);
        let tiers = assign_value_tiers(&scores, &thresholds);

        let high = tiers.iter().filter(|(_, t)| *t == ValueTier::High).count();
        let mid = tiers.iter().filter(|(_, t)| *t == ValueTier::Mid).count();
        let low = tiers.iter().filter(|(_, t)| *t == ValueTier::Low).count();
        assert_eq!(high, 20);
        assert_eq!(mid, 30);
        assert_eq!(low, 50);
    }

    #[test]
    fn tier_assignment_is_order_independent() {
        let mut features: Vec<FeatureRecord> = (0..10)
            .map(|i| feature(&format!("c{i}"), 100, 2, 500.0)) // all tied
            .collect();
        let thresholds = ThresholdConfig::default();

        let scores = score_population(&features, &thresholds);
        let mut tiers_a = assign_value_tiers(&scores, &thresholds);
        tiers_a.sort_by(|a, b| a.0.cmp(&b.0));

        features.reverse();
        let scores = score_population(&features, &thresholds);
        let mut tiers_b = assign_value_tiers(&scores, &thresholds);
        tiers_b.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(tiers_a, tiers_b);
    }

    #[test]
    fn percentile_rank_bounds() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_rank(&sorted, 4.0), 1.0);
        assert_eq!(percentile_rank(&sorted, 1.0), 0.25);
        assert_eq!(percentile_rank(&sorted, 0.0), 0.0);
    }
}
