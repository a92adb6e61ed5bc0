// Pyramid Tier Assigner - customer segment bucketing, within-segment
// score normalization and the Champion/Loyalist/Engaged/Prospect cascade
//
// Absolute revenue differs by orders of magnitude between a B2C driver
// and an enterprise fleet, so the boosted RFM score is re-ranked and
// re-normalized *within* each customer segment before any tier rule
// sees it. Customers whose lifecycle is Churned never enter the cascade;
// everyone the cascade rejects lands in the dormant pool.

use crate::engine::value_tier::{percentile_rank, CustomerScore};
use crate::model::{
    Customer, CustomerSegment, DormantSegment, FeatureRecord, Lifecycle, PyramidTier,
};
use crate::thresholds::ThresholdConfig;
use std::collections::HashMap;

/// Result of pyramid assignment for one customer.
///
/// Exactly one of `tier` and `dormant` is set; `composite` is kept only
/// for tiered customers.
#[derive(Debug, Clone)]
pub struct PyramidAssignment {
    pub customer_segment: CustomerSegment,
    pub tier: Option<PyramidTier>,
    pub composite: Option<f64>,
    pub dormant: Option<DormantSegment>,
    pub high_value_tire_purchaser: bool,
    pub next_tier_requirements: Option<String>,
}

/// Segment bucketing: B2C for personal accounts, B2B by fleet size.
/// B2B accounts with a missing or zero fleet size bucket as SMB (the
/// validation engine flags how common the missing case is).
pub fn segment_for(customer: &Customer, thresholds: &ThresholdConfig) -> CustomerSegment {
    if customer.is_b2c() {
        return CustomerSegment::B2c;
    }
    let fleet = customer.fleet_size.unwrap_or(1).max(1);
    if fleet <= thresholds.smb_max_fleet {
        CustomerSegment::Smb
    } else if fleet <= thresholds.large_max_fleet {
        CustomerSegment::Large
    } else {
        CustomerSegment::Enterprise
    }
}

/// Re-rank boosted scores within each segment into a 0-1 composite.
///
/// Percentile rank against segment peers only: a customer is never
/// compared against another segment's spend scale. Members of a
/// single-customer segment rank 1.0 by construction.
pub fn normalize_within_segments(
    scores: &[CustomerScore],
    segments: &HashMap<String, CustomerSegment>,
) -> HashMap<String, f64> {
    let mut by_segment: HashMap<CustomerSegment, Vec<f64>> = HashMap::new();
    for score in scores {
        if let Some(segment) = segments.get(&score.user_group_id) {
            by_segment.entry(*segment).or_default().push(score.boosted);
        }
    }
    for values in by_segment.values_mut() {
        values.sort_by(|a, b| a.total_cmp(b));
    }

    scores
        .iter()
        .filter_map(|score| {
            let segment = segments.get(&score.user_group_id)?;
            let sorted = by_segment.get(segment)?;
            Some((
                score.user_group_id.clone(),
                percentile_rank(sorted, score.boosted),
            ))
        })
        .collect()
}

/// Single order at or above the configured NOK threshold
pub fn is_high_value_tire_purchaser(feature: &FeatureRecord, thresholds: &ThresholdConfig) -> bool {
    feature
        .largest_tire_order
        .map(|amount| amount >= thresholds.high_value_tire_order_nok)
        .unwrap_or(false)
}

/// The tier rule cascade, first match wins. Only customers with an
/// active lifecycle (New/Active/At-risk/Winback) are evaluated; the rest
/// go straight to the dormant pool.
pub fn assign(
    feature: &FeatureRecord,
    lifecycle: Lifecycle,
    segment: CustomerSegment,
    composite: f64,
    thresholds: &ThresholdConfig,
) -> PyramidAssignment {
    let high_value = is_high_value_tire_purchaser(feature, thresholds);

    let tier = if !lifecycle.is_pyramid_eligible() {
        None
    } else if lifecycle == Lifecycle::Active
        && (composite >= thresholds.champion_min_composite
            || feature.is_storage_customer()
            || high_value
            || segment == CustomerSegment::Enterprise)
    {
        Some(PyramidTier::Champion)
    } else if (lifecycle == Lifecycle::Active
        && composite >= thresholds.loyalist_min_composite_active)
        || (lifecycle == Lifecycle::AtRisk
            && composite >= thresholds.loyalist_min_composite_at_risk)
    {
        Some(PyramidTier::Loyalist)
    } else if (matches!(lifecycle, Lifecycle::Active | Lifecycle::AtRisk)
        && feature.lifetime_bookings >= thresholds.engaged_min_lifetime_bookings)
        || (lifecycle == Lifecycle::Winback
            && composite >= thresholds.engaged_min_composite_winback)
    {
        Some(PyramidTier::Engaged)
    } else if lifecycle == Lifecycle::New
        || lifecycle == Lifecycle::Winback
        || (feature.lifetime_bookings == 1
            && feature
                .tenure_days
                .map(|t| t < thresholds.prospect_max_tenure_days)
                .unwrap_or(false))
    {
        Some(PyramidTier::Prospect)
    } else {
        None
    };

    let dormant = if tier.is_none() {
        Some(dormant_segment(feature, lifecycle, thresholds))
    } else {
        None
    };

    let next_tier_requirements =
        tier.and_then(|t| next_tier_hint(t, lifecycle, composite, feature, thresholds));

    PyramidAssignment {
        customer_segment: segment,
        tier,
        composite: tier.map(|_| composite),
        dormant,
        high_value_tire_purchaser: high_value,
        next_tier_requirements,
    }
}

/// Dormant pool split: recently churned customers are worth a winback
/// campaign, the rest are written off as one-timers
fn dormant_segment(
    feature: &FeatureRecord,
    lifecycle: Lifecycle,
    thresholds: &ThresholdConfig,
) -> DormantSegment {
    if lifecycle == Lifecycle::Churned {
        let recently = feature
            .recency_days
            .map(|d| d <= thresholds.salvageable_max_days)
            .unwrap_or(false);
        if recently {
            return DormantSegment::Salvageable;
        }
    }
    DormantSegment::Transient
}

/// Informational hint: the smallest unmet condition of the next tier up.
/// Champions have nowhere to go, so they get no hint.
fn next_tier_hint(
    tier: PyramidTier,
    lifecycle: Lifecycle,
    composite: f64,
    feature: &FeatureRecord,
    thresholds: &ThresholdConfig,
) -> Option<String> {
    match tier {
        PyramidTier::Champion => None,
        PyramidTier::Loyalist => {
            if lifecycle == Lifecycle::Active {
                Some(format!(
                    "composite score {:.2}, needs >={:.2} for Champion",
                    composite, thresholds.champion_min_composite
                ))
            } else {
                Some("needs an active lifecycle for Champion".to_string())
            }
        }
        PyramidTier::Engaged => match lifecycle {
            Lifecycle::Active => Some(format!(
                "composite score {:.2}, needs >={:.2} for Loyalist",
                composite, thresholds.loyalist_min_composite_active
            )),
            Lifecycle::AtRisk => Some(format!(
                "composite score {:.2}, needs >={:.2} for Loyalist",
                composite, thresholds.loyalist_min_composite_at_risk
            )),
            _ => Some("needs an active lifecycle for Loyalist".to_string()),
        },
        PyramidTier::Prospect => {
            if feature.lifetime_bookings < thresholds.engaged_min_lifetime_bookings {
                Some(format!(
                    "has {} lifetime bookings, needs >={} for Engaged",
                    feature.lifetime_bookings, thresholds.engaged_min_lifetime_bookings
                ))
            } else {
                Some(format!(
                    "composite score {:.2}, needs >={:.2} for Engaged",
                    composite, thresholds.engaged_min_composite_winback
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CategoryBreakdown;
    use chrono::Utc;

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig::default()
    }

    fn b2b(id: &str, fleet: Option<u32>) -> Customer {
        Customer {
            user_group_id: id.to_string(),
            org_id: Some("org-1".to_string()),
            is_personal: false,
            fleet_size: fleet,
            storage_status: false,
        }
    }

    fn feature(id: &str) -> FeatureRecord {
        FeatureRecord {
            user_group_id: id.to_string(),
            recency_days: Some(30),
            frequency_24m: 4,
            revenue_24m: 5000.0,
            margin_24m: 1500.0,
            discount_share_24m: 0.0,
            storage_active: false,
            categories: CategoryBreakdown::default(),
            tags: vec![],
            tenure_days: Some(600),
            lifetime_bookings: 6,
            largest_tire_order: None,
            first_booking_at: None,
            last_booking_at: None,
            computed_at: Utc::now(),
        }
    }

    fn score(id: &str, boosted: f64) -> CustomerScore {
        CustomerScore {
            user_group_id: id.to_string(),
            rfm: boosted,
            boosted,
        }
    }

    #[test]
    fn fleet_size_buckets() {
        let t = thresholds();
        assert_eq!(segment_for(&b2b("a", Some(5)), &t), CustomerSegment::Smb);
        assert_eq!(segment_for(&b2b("b", Some(19)), &t), CustomerSegment::Smb);
        assert_eq!(segment_for(&b2b("c", Some(20)), &t), CustomerSegment::Large);
        assert_eq!(segment_for(&b2b("d", Some(49)), &t), CustomerSegment::Large);
        assert_eq!(
            segment_for(&b2b("e", Some(60)), &t),
            CustomerSegment::Enterprise
        );
        // Missing or zero fleet size falls back to SMB
        assert_eq!(segment_for(&b2b("f", None), &t), CustomerSegment::Smb);
        assert_eq!(segment_for(&b2b("g", Some(0)), &t), CustomerSegment::Smb);
    }

    #[test]
    fn personal_account_is_b2c_even_with_org() {
        let t = thresholds();
        let mut customer = b2b("a", Some(60));
        customer.is_personal = true;
        assert_eq!(segment_for(&customer, &t), CustomerSegment::B2c);
    }

    #[test]
    fn segments_are_normalized_independently() {
        // The modest B2C spender must not be crushed by enterprise revenue
        let scores = vec![
            score("b2c_small", 20.0),
            score("b2c_big", 40.0),
            score("ent_huge", 95.0),
        ];
        let segments: HashMap<String, CustomerSegment> = [
            ("b2c_small".to_string(), CustomerSegment::B2c),
            ("b2c_big".to_string(), CustomerSegment::B2c),
            ("ent_huge".to_string(), CustomerSegment::Enterprise),
        ]
        .into();

        let composites = normalize_within_segments(&scores, &segments);
        assert_eq!(composites["b2c_big"], 1.0);
        assert_eq!(composites["b2c_small"], 0.5);
        // Alone in its segment, the enterprise account ranks 1.0
        assert_eq!(composites["ent_huge"], 1.0);
    }

    #[test]
    fn new_customer_is_prospect() {
        // Scenario: first booking 10 days ago, nothing else
        let t = thresholds();
        let mut f = feature("c1");
        f.tenure_days = Some(10);
        f.recency_days = Some(10);
        f.lifetime_bookings = 1;

        let assignment = assign(&f, Lifecycle::New, CustomerSegment::B2c, 0.10, &t);
        assert_eq!(assignment.tier, Some(PyramidTier::Prospect));
        assert_eq!(assignment.composite, Some(0.10));
        assert!(assignment.dormant.is_none());
    }

    #[test]
    fn storage_customer_is_champion_regardless_of_composite() {
        let t = thresholds();
        let mut f = feature("c1");
        f.storage_active = true;

        let assignment = assign(&f, Lifecycle::Active, CustomerSegment::B2c, 0.01, &t);
        assert_eq!(assignment.tier, Some(PyramidTier::Champion));
    }

    #[test]
    fn enterprise_active_is_champion_unconditionally() {
        let t = thresholds();
        let assignment = assign(
            &feature("c1"),
            Lifecycle::Active,
            CustomerSegment::Enterprise,
            0.0,
            &t,
        );
        assert_eq!(assignment.tier, Some(PyramidTier::Champion));
    }

    #[test]
    fn high_value_tire_purchase_qualifies_for_champion() {
        let t = thresholds();
        let mut f = feature("c1");
        f.largest_tire_order = Some(9500.0);

        let assignment = assign(&f, Lifecycle::Active, CustomerSegment::B2c, 0.10, &t);
        assert!(assignment.high_value_tire_purchaser);
        assert_eq!(assignment.tier, Some(PyramidTier::Champion));
    }

    #[test]
    fn at_risk_needs_higher_composite_for_loyalist() {
        let t = thresholds();
        let f = feature("c1");

        let low = assign(&f, Lifecycle::AtRisk, CustomerSegment::B2c, 0.60, &t);
        assert_eq!(low.tier, Some(PyramidTier::Engaged)); // >=2 bookings

        let high = assign(&f, Lifecycle::AtRisk, CustomerSegment::B2c, 0.75, &t);
        assert_eq!(high.tier, Some(PyramidTier::Loyalist));
    }

    #[test]
    fn winback_with_low_composite_falls_to_prospect() {
        let t = thresholds();
        let f = feature("c1");

        let qualified = assign(&f, Lifecycle::Winback, CustomerSegment::B2c, 0.55, &t);
        assert_eq!(qualified.tier, Some(PyramidTier::Engaged));

        let unqualified = assign(&f, Lifecycle::Winback, CustomerSegment::B2c, 0.20, &t);
        assert_eq!(unqualified.tier, Some(PyramidTier::Prospect));
    }

    #[test]
    fn recently_churned_is_salvageable_old_churn_is_transient() {
        // Scenario: churned 13 months ago vs churned 3 years ago
        let t = thresholds();
        let mut f = feature("c1");

        f.recency_days = Some(395);
        let recent = assign(&f, Lifecycle::Churned, CustomerSegment::B2c, 0.0, &t);
        assert_eq!(recent.tier, None);
        assert_eq!(recent.composite, None);
        assert_eq!(recent.dormant, Some(DormantSegment::Salvageable));

        f.recency_days = Some(1100);
        let old = assign(&f, Lifecycle::Churned, CustomerSegment::B2c, 0.0, &t);
        assert_eq!(old.dormant, Some(DormantSegment::Transient));
    }

    #[test]
    fn single_old_booking_active_customer_is_dormant_transient() {
        // Falls through every rule: not new, 1 lifetime booking, long
        // tenure, low composite
        let t = thresholds();
        let mut f = feature("c1");
        f.lifetime_bookings = 1;
        f.tenure_days = Some(400);

        let assignment = assign(&f, Lifecycle::Active, CustomerSegment::B2c, 0.10, &t);
        assert_eq!(assignment.tier, None);
        assert_eq!(assignment.dormant, Some(DormantSegment::Transient));
    }

    #[test]
    fn tier_and_dormant_are_mutually_exclusive() {
        let t = thresholds();
        let f = feature("c1");
        for lifecycle in [
            Lifecycle::New,
            Lifecycle::Active,
            Lifecycle::AtRisk,
            Lifecycle::Churned,
            Lifecycle::Winback,
        ] {
            for composite in [0.0, 0.5, 1.0] {
                let a = assign(&f, lifecycle, CustomerSegment::B2c, composite, &t);
                assert_ne!(a.tier.is_some(), a.dormant.is_some());
                assert_eq!(a.composite.is_some(), a.tier.is_some());
            }
        }
    }

    #[test]
    fn loyalist_hint_points_at_champion_composite() {
        let t = thresholds();
        let f = feature("c1");
        let assignment = assign(&f, Lifecycle::Active, CustomerSegment::B2c, 0.55, &t);
        assert_eq!(assignment.tier, Some(PyramidTier::Loyalist));
        let hint = assignment.next_tier_requirements.unwrap();
        assert!(hint.contains("0.55"));
        assert!(hint.contains("Champion"));
    }
}
