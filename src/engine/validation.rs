// Post-run data quality checks
//
// Findings are data, not errors: every check returns pass/warning/fail
// with the raw counts behind the verdict, and the report's overall
// status is the worst individual one. Queries run against a plain
// connection so the same checks work on the write-side store and on a
// pooled read connection.

use crate::model::{
    CategoryBreakdown, CheckCounts, CheckStatus, ValidationCheck, ValidationReport,
    ValidationSummary,
};
use anyhow::{Context, Result};
use rusqlite::Connection;

/// Revenue reconciliation tolerance in NOK
const REVENUE_EPSILON: f64 = 0.01;
/// Revenue reconciliation samples at most this many feature rows
const REVENUE_SAMPLE_LIMIT: u32 = 200;

const COVERAGE_PASS_PCT: f64 = 95.0;
const COVERAGE_WARN_PCT: f64 = 80.0;
const FLEET_PASS_PCT: f64 = 90.0;
const FLEET_WARN_PCT: f64 = 70.0;

/// Run every check and aggregate the worst status.
///
/// An empty population validates trivially: zero customers means 100%
/// coverage, not division by zero.
pub fn run_checks(conn: &Connection) -> Result<ValidationReport> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
    let with_features: i64 = conn.query_row(
        "SELECT COUNT(*) FROM customers c
         JOIN customer_features f ON f.user_group_id = c.user_group_id",
        [],
        |row| row.get(0),
    )?;
    let with_segments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM customers c
         JOIN customer_segments s ON s.user_group_id = c.user_group_id
         WHERE s.lifecycle IS NOT NULL",
        [],
        |row| row.get(0),
    )?;
    let with_pyramid: i64 = conn.query_row(
        "SELECT COUNT(*) FROM customer_segments
         WHERE pyramid_tier IS NOT NULL OR dormant_segment IS NOT NULL",
        [],
        |row| row.get(0),
    )?;

    let checks = vec![
        coverage_check(
            "feature_coverage",
            "customers with a feature record",
            total,
            with_features,
        ),
        coverage_check(
            "lifecycle_coverage",
            "customers with a lifecycle label",
            total,
            with_segments,
        ),
        coverage_check(
            "pyramid_coverage",
            "customers with a pyramid tier or dormant segment",
            total,
            with_pyramid,
        ),
        revenue_split_check(conn)?,
        fleet_size_check(conn)?,
        tier_dormant_exclusivity_check(conn)?,
        high_value_check(conn)?,
    ];

    let overall_status = checks
        .iter()
        .fold(CheckStatus::Pass, |acc, check| acc.worst(check.status));

    Ok(ValidationReport {
        overall_status,
        checks,
        summary: ValidationSummary {
            total,
            with_features,
            with_segments,
            with_pyramid,
            coverage_pct: pct(with_segments, total),
        },
    })
}

fn pct(covered: i64, total: i64) -> f64 {
    if total == 0 {
        100.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

fn coverage_check(name: &str, what: &str, total: i64, covered: i64) -> ValidationCheck {
    let coverage = pct(covered, total);
    let status = if coverage >= COVERAGE_PASS_PCT {
        CheckStatus::Pass
    } else if coverage >= COVERAGE_WARN_PCT {
        CheckStatus::Warning
    } else {
        CheckStatus::Fail
    };
    ValidationCheck {
        name: name.to_string(),
        status,
        message: format!("{coverage:.1}% of {what} ({covered}/{total})"),
        counts: CheckCounts { total, covered },
    }
}

/// Category revenues must sum to at most the 24-month total on every
/// feature row; checked on a bounded sample so validation stays cheap
/// on large populations.
fn revenue_split_check(conn: &Connection) -> Result<ValidationCheck> {
    let mut stmt = conn.prepare(
        "SELECT user_group_id, revenue_24m, category_metrics
         FROM customer_features ORDER BY user_group_id LIMIT ?1",
    )?;
    let rows = stmt.query_map([REVENUE_SAMPLE_LIMIT], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut sampled = 0i64;
    let mut violations = 0i64;
    for row in rows {
        let (user_group_id, revenue_24m, payload) = row?;
        let categories: CategoryBreakdown = serde_json::from_str(&payload)
            .with_context(|| format!("malformed category_metrics for {user_group_id}"))?;
        sampled += 1;
        if categories.total_revenue() > revenue_24m + REVENUE_EPSILON {
            violations += 1;
        }
    }

    let status = if violations == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    Ok(ValidationCheck {
        name: "revenue_split".to_string(),
        status,
        message: format!(
            "{violations} of {sampled} sampled feature rows have category revenue above the 24m total"
        ),
        counts: CheckCounts {
            total: sampled,
            covered: sampled - violations,
        },
    })
}

/// B2B accounts should report a fleet size; the segment bucketing falls
/// back to SMB when it is missing, so widespread absence skews segments.
fn fleet_size_check(conn: &Connection) -> Result<ValidationCheck> {
    let (b2b_total, with_fleet): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(fleet_size IS NOT NULL), 0)
         FROM customers WHERE org_id IS NOT NULL AND is_personal = 0",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let coverage = pct(with_fleet, b2b_total);
    let status = if coverage >= FLEET_PASS_PCT {
        CheckStatus::Pass
    } else if coverage >= FLEET_WARN_PCT {
        CheckStatus::Warning
    } else {
        CheckStatus::Fail
    };
    Ok(ValidationCheck {
        name: "b2b_fleet_size".to_string(),
        status,
        message: format!(
            "{coverage:.1}% of B2B accounts report a fleet size ({with_fleet}/{b2b_total})"
        ),
        counts: CheckCounts {
            total: b2b_total,
            covered: with_fleet,
        },
    })
}

/// A segment row must hold a pyramid tier or a dormant segment, never
/// both and (once classified) never neither; the composite score must be
/// present exactly on the tiered rows.
fn tier_dormant_exclusivity_check(conn: &Connection) -> Result<ValidationCheck> {
    let (classified, violations): (i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(
                    (pyramid_tier IS NOT NULL) = (dormant_segment IS NOT NULL)
                    OR (pyramid_tier IS NOT NULL) != (composite_score IS NOT NULL)
                ), 0)
         FROM customer_segments
         WHERE pyramid_tier IS NOT NULL OR dormant_segment IS NOT NULL OR composite_score IS NOT NULL",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let status = if violations == 0 {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };
    Ok(ValidationCheck {
        name: "tier_dormant_exclusivity".to_string(),
        status,
        message: format!(
            "{violations} of {classified} classified rows violate tier/dormant exclusivity"
        ),
        counts: CheckCounts {
            total: classified,
            covered: classified - violations,
        },
    })
}

/// Informational: how many customers carry the high-value tire flag
fn high_value_check(conn: &Connection) -> Result<ValidationCheck> {
    let (total, flagged): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(high_value_tire_purchaser), 0)
         FROM customer_segments",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(ValidationCheck {
        name: "high_value_tire_purchasers".to_string(),
        status: CheckStatus::Pass,
        message: format!("{flagged} of {total} segmented customers are high-value tire purchasers"),
        counts: CheckCounts {
            total,
            covered: flagged,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, FeatureRecord, Lifecycle};
    use crate::store::Store;
    use chrono::Utc;

    fn customer(id: &str, org: Option<&str>, fleet: Option<u32>) -> Customer {
        Customer {
            user_group_id: id.to_string(),
            org_id: org.map(str::to_string),
            is_personal: org.is_none(),
            fleet_size: fleet,
            storage_status: false,
        }
    }

    fn feature(id: &str, revenue: f64) -> FeatureRecord {
        FeatureRecord {
            user_group_id: id.to_string(),
            recency_days: Some(10),
            frequency_24m: 1,
            revenue_24m: revenue,
            margin_24m: revenue * 0.3,
            discount_share_24m: 0.0,
            storage_active: false,
            categories: CategoryBreakdown::default(),
            tags: vec![],
            tenure_days: Some(10),
            lifetime_bookings: 1,
            largest_tire_order: None,
            first_booking_at: None,
            last_booking_at: None,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn empty_database_validates_clean() {
        let store = Store::open_in_memory().unwrap();
        let report = run_checks(store.connection()).unwrap();
        assert_eq!(report.overall_status, CheckStatus::Pass);
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.coverage_pct, 100.0);
    }

    #[test]
    fn missing_features_fail_coverage() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            store
                .upsert_customer(&customer(&format!("c{i}"), None, None))
                .unwrap();
        }
        // Only half the population gets features, well below the 80% floor
        for i in 0..5 {
            store.upsert_feature(&feature(&format!("c{i}"), 100.0)).unwrap();
        }

        let report = run_checks(store.connection()).unwrap();
        assert_eq!(report.overall_status, CheckStatus::Fail);
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "feature_coverage")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(check.counts.covered, 5);
    }

    #[test]
    fn inflated_category_revenue_fails_split_check() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_customer(&customer("c1", None, None)).unwrap();

        let mut f = feature("c1", 100.0);
        f.categories.wash.revenue = 150.0; // exceeds the 24m total
        store.upsert_feature(&f).unwrap();

        let report = run_checks(store.connection()).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "revenue_split")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
    }

    #[test]
    fn missing_b2b_fleet_sizes_warn() {
        let store = Store::open_in_memory().unwrap();
        // 10 B2B accounts, 8 with a fleet size: 80% is in the warning band
        for i in 0..10 {
            let fleet = if i < 8 { Some(5) } else { None };
            store
                .upsert_customer(&customer(&format!("b{i}"), Some("org"), fleet))
                .unwrap();
            store.upsert_feature(&feature(&format!("b{i}"), 100.0)).unwrap();
            store
                .upsert_lifecycle(&format!("b{i}"), Lifecycle::Active, None, Utc::now())
                .unwrap();
        }

        let report = run_checks(store.connection()).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "b2b_fleet_size")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Warning);
        assert_eq!(check.counts.covered, 8);
    }

    #[test]
    fn tier_and_dormant_on_same_row_fails() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_customer(&customer("c1", None, None)).unwrap();
        store
            .upsert_lifecycle("c1", Lifecycle::Churned, None, Utc::now())
            .unwrap();
        // Force an invalid row the engine would never write
        store
            .connection()
            .execute(
                "UPDATE customer_segments
                 SET pyramid_tier = 2, dormant_segment = 'salvageable'
                 WHERE user_group_id = 'c1'",
                [],
            )
            .unwrap();

        let report = run_checks(store.connection()).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "tier_dormant_exclusivity")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
    }

    #[test]
    fn tiered_row_without_composite_is_flagged() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_customer(&customer("c1", None, None)).unwrap();
        store
            .upsert_lifecycle("c1", Lifecycle::Active, None, Utc::now())
            .unwrap();
        // A tier with no composite score: another shape the engine
        // would never write
        store
            .connection()
            .execute(
                "UPDATE customer_segments
                 SET pyramid_tier = 2, pyramid_tier_name = 'Loyalist', composite_score = NULL
                 WHERE user_group_id = 'c1'",
                [],
            )
            .unwrap();

        let report = run_checks(store.connection()).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "tier_dormant_exclusivity")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(check.counts.covered, check.counts.total - 1);
    }

    #[test]
    fn high_value_count_is_informational() {
        let store = Store::open_in_memory().unwrap();
        let report = run_checks(store.connection()).unwrap();
        let check = report
            .checks
            .iter()
            .find(|c| c.name == "high_value_tire_purchasers")
            .unwrap();
        assert_eq!(check.status, CheckStatus::Pass);
    }
}
