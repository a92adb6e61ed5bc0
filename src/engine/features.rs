// Feature Aggregator - rolls raw bookings and order lines into one
// feature vector per customer
//
// Input: all bookings for one customer (trailing 24-month window plus
// lifetime totals). Output: one FeatureRecord, upserted by the engine.
// Reruns with identical inputs produce identical output aside from the
// computed_at stamp.

use crate::model::{Booking, CategoryBreakdown, Customer, FeatureRecord, ServiceCategory};
use crate::thresholds::ThresholdConfig;
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

/// Ordered keyword rules for category tagging. First matching rule wins,
/// so the specific service terms come before the generic tire terms -
/// "dekkhotell" must tag as storage, not tire_shop.
const CATEGORY_RULES: &[(ServiceCategory, &[&str])] = &[
    (
        ServiceCategory::WheelChange,
        &["hjulskift", "dekkskift", "wheel change", "tire change", "omlegging"],
    ),
    (
        ServiceCategory::Storage,
        &["dekkhotell", "hjulhotell", "oppbevaring", "storage"],
    ),
    (ServiceCategory::Wash, &["vask", "wash", "rens", "detailing"]),
    (
        ServiceCategory::Repair,
        &["reparasjon", "repair", "punktering", "puncture", "lapping"],
    ),
    (
        ServiceCategory::TireShop,
        &["dekk", "felg", "tire", "tyre", "rim"],
    ),
];

/// Match an order-line description against the keyword rules,
/// case-insensitively. Returns None for lines no rule covers.
pub fn categorize_line(description: &str) -> Option<ServiceCategory> {
    let lowered = description.to_lowercase();
    for (category, keywords) in CATEGORY_RULES {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return Some(*category);
        }
    }
    None
}

/// Aggregate one customer's bookings into a feature record.
///
/// Cancelled bookings and bookings without any usable timestamp are
/// skipped. A non-finite order-line amount marks the whole customer as
/// malformed input - the caller skips and logs that customer rather than
/// aborting the batch.
pub fn aggregate_customer(
    customer: &Customer,
    bookings: &[Booking],
    thresholds: &ThresholdConfig,
    now: DateTime<Utc>,
) -> Result<FeatureRecord> {
    for booking in bookings {
        for line in &booking.lines {
            if !line.amount.is_finite() {
                bail!(
                    "order line {} on booking {} has non-finite amount",
                    line.id,
                    booking.id
                );
            }
        }
    }

    let window_start = now - Duration::days(thresholds.window_days());

    let mut usable: Vec<&Booking> = bookings
        .iter()
        .filter(|b| {
            if b.cancelled {
                return false;
            }
            if b.effective_time().is_none() {
                tracing::debug!("Booking {} has no usable timestamp, skipping", b.id);
                return false;
            }
            true
        })
        .collect();
    // Effective times are all Some after the filter above
    usable.sort_by_key(|b| b.effective_time());

    let first_booking_at = usable.first().and_then(|b| b.effective_time());
    let last_booking_at = usable.last().and_then(|b| b.effective_time());
    let lifetime_bookings = usable.len() as u32;

    let mut frequency_24m = 0u32;
    let mut revenue_24m = 0.0;
    let mut discounted_revenue = 0.0;
    let mut categories = CategoryBreakdown::default();
    let mut largest_tire_order: Option<f64> = None;

    for booking in &usable {
        let Some(at) = booking.effective_time() else {
            continue;
        };
        let in_window = at >= window_start;

        if in_window {
            frequency_24m += 1;
            revenue_24m += booking.gross_amount();
            discounted_revenue += booking
                .lines
                .iter()
                .filter(|l| l.is_discount)
                .map(|l| l.amount)
                .sum::<f64>();
        }

        // Category tagging: discount lines are never categorized
        let mut seen_in_booking = [false; ServiceCategory::ALL.len()];
        for line in &booking.lines {
            if line.is_discount {
                continue;
            }
            let Some(category) = categorize_line(&line.description) else {
                continue;
            };

            // Largest tire order is a lifetime metric
            if category == ServiceCategory::TireShop {
                largest_tire_order = Some(match largest_tire_order {
                    Some(best) if best >= line.amount => best,
                    _ => line.amount,
                });
            }

            if !in_window {
                continue;
            }

            let metrics = categories.get_mut(category);
            metrics.revenue += line.amount;
            metrics.last_booking_at = Some(match metrics.last_booking_at {
                Some(prev) if prev >= at => prev,
                _ => at,
            });

            // Frequency counts bookings, not lines
            if let Some(idx) = ServiceCategory::ALL.iter().position(|c| *c == category) {
                if !seen_in_booking[idx] {
                    seen_in_booking[idx] = true;
                    metrics.frequency += 1;
                }
            }
        }
    }

    // Line-level margin is not modeled: apply the configured default
    for category in ServiceCategory::ALL {
        let metrics = categories.get_mut(category);
        metrics.margin = metrics.revenue * thresholds.default_margin_pct;
    }
    let margin_24m = revenue_24m * thresholds.default_margin_pct;

    let discount_share_24m = if revenue_24m > 0.0 {
        discounted_revenue / revenue_24m
    } else {
        0.0
    };

    let storage_active = categories.storage.frequency > 0 || customer.storage_status;

    let recency_days = last_booking_at.map(|t| (now - t).num_days());
    let tenure_days = first_booking_at.map(|t| (now - t).num_days());

    let mut feature = FeatureRecord {
        user_group_id: customer.user_group_id.clone(),
        recency_days,
        frequency_24m,
        revenue_24m,
        margin_24m,
        discount_share_24m,
        storage_active,
        categories,
        tags: Vec::new(),
        tenure_days,
        lifetime_bookings,
        largest_tire_order,
        first_booking_at,
        last_booking_at,
        computed_at: now,
    };
    feature.tags = derive_tags(&feature, thresholds);
    Ok(feature)
}

/// Service tags: active categories plus the derived relationship flags
fn derive_tags(feature: &FeatureRecord, thresholds: &ThresholdConfig) -> Vec<String> {
    let mut tags: Vec<String> = ServiceCategory::ALL
        .iter()
        .filter(|c| feature.categories.get(**c).frequency > 0)
        .map(|c| c.as_str().to_string())
        .collect();
    if feature.is_storage_customer() {
        tags.push("storage_customer".to_string());
    }
    if feature.is_fleet_customer(thresholds.fleet_wash_min) {
        tags.push("fleet_customer".to_string());
    }
    if feature.is_multi_service() {
        tags.push("multi_service".to_string());
    }
    tags
}
