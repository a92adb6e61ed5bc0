// End-to-end pipeline tests over an in-memory database
//
// Each test seeds customers and bookings, runs the full classification
// pipeline and asserts on the stored segment rows - the same surface the
// CLI and reporting queries read.

use chrono::{DateTime, Duration, Utc};
use segmentry::demo;
use segmentry::engine::Engine;
use segmentry::model::{
    Booking, CheckStatus, Customer, CustomerSegment, DormantSegment, Lifecycle, OrderLine,
    PyramidTier, SegmentRecord, ValueTier,
};
use segmentry::store::Store;
use std::collections::HashMap;

fn engine() -> Engine {
    Engine::new(Store::open_in_memory().unwrap())
}

fn b2c(id: &str, storage: bool) -> Customer {
    Customer {
        user_group_id: id.to_string(),
        org_id: None,
        is_personal: true,
        fleet_size: None,
        storage_status: storage,
    }
}

fn b2b(id: &str, fleet_size: u32) -> Customer {
    Customer {
        user_group_id: id.to_string(),
        org_id: Some(format!("org-{id}")),
        is_personal: false,
        fleet_size: Some(fleet_size),
        storage_status: false,
    }
}

fn booking(id: &str, customer: &str, at: DateTime<Utc>, amount: f64, description: &str) -> Booking {
    Booking {
        id: id.to_string(),
        user_group_id: customer.to_string(),
        started_at: Some(at),
        booking_date: None,
        completed_at: None,
        completed: true,
        cancelled: false,
        lines: vec![OrderLine {
            id: format!("{id}-l0"),
            amount,
            currency: "NOK".to_string(),
            is_discount: false,
            description: description.to_string(),
        }],
    }
}

fn segments(engine: &Engine) -> HashMap<String, SegmentRecord> {
    engine.store().load_segments().unwrap()
}

#[test]
fn first_time_customer_becomes_new_prospect() {
    // Single wheel-change booking ten days ago
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(10), 1200.0, "Hjulskift"))
        .unwrap();

    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::New));
    assert_eq!(record.customer_segment, Some(CustomerSegment::B2c));
    assert_eq!(record.pyramid_tier, Some(PyramidTier::Prospect));
    assert!(record.dormant_segment.is_none());
}

#[test]
fn storage_contract_keeps_stale_customer_active_champion() {
    // Last booking over a year ago, but the tire hotel contract is live
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", true)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(400), 2200.0, "Dekkhotell"))
        .unwrap();

    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::Active));
    assert_eq!(record.pyramid_tier, Some(PyramidTier::Champion));
}

#[test]
fn eight_months_quiet_is_at_risk() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(600), 800.0, "Dekkskift"))
        .unwrap();
    engine
        .store()
        .insert_booking(&booking("b2", "c1", now - Duration::days(240), 900.0, "Dekkskift"))
        .unwrap();

    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::AtRisk));
}

#[test]
fn active_enterprise_fleet_is_champion() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2b("ent", 80)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "ent", now - Duration::days(15), 22000.0, "Dekkskift flåte"))
        .unwrap();
    engine
        .store()
        .insert_booking(&booking("b2", "ent", now - Duration::days(45), 18000.0, "Vask"))
        .unwrap();

    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["ent"];
    assert_eq!(record.customer_segment, Some(CustomerSegment::Enterprise));
    assert_eq!(record.lifecycle, Some(Lifecycle::Active));
    assert_eq!(record.pyramid_tier, Some(PyramidTier::Champion));
    assert_eq!(record.fleet_size, Some(80));
}

#[test]
fn churn_age_splits_the_dormant_pool() {
    // Churned 13 months ago: salvageable. Churned three years ago: transient.
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("recent", false)).unwrap();
    engine.store().upsert_customer(&b2c("ancient", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "recent", now - Duration::days(395), 900.0, "Hjulskift"))
        .unwrap();
    engine
        .store()
        .insert_booking(&booking("b2", "ancient", now - Duration::days(1100), 700.0, "Vask"))
        .unwrap();

    engine.run_classification(now).unwrap();

    let all = segments(&engine);
    assert_eq!(all["recent"].lifecycle, Some(Lifecycle::Churned));
    assert_eq!(all["recent"].dormant_segment, Some(DormantSegment::Salvageable));
    assert!(all["recent"].pyramid_tier.is_none());

    assert_eq!(all["ancient"].dormant_segment, Some(DormantSegment::Transient));
}

#[test]
fn winback_requires_prior_churned_state() {
    // A customer who was never churned must not come out as Winback,
    // no matter how many runs happen
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(500), 800.0, "Hjulskift"))
        .unwrap();
    engine
        .store()
        .insert_booking(&booking("b2", "c1", now - Duration::days(20), 800.0, "Hjulskift"))
        .unwrap();

    engine.run_classification(now).unwrap();
    assert_eq!(segments(&engine)["c1"].lifecycle, Some(Lifecycle::Active));

    engine.run_classification(now).unwrap();
    assert_eq!(segments(&engine)["c1"].lifecycle, Some(Lifecycle::Active));
}

#[test]
fn returning_churned_customer_becomes_winback_then_clears() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(400), 900.0, "Hjulskift"))
        .unwrap();

    engine.run_classification(now).unwrap();
    assert_eq!(segments(&engine)["c1"].lifecycle, Some(Lifecycle::Churned));

    // They come back with a fresh booking
    engine
        .store()
        .insert_booking(&booking("b2", "c1", now - Duration::days(1), 1100.0, "Dekkskift"))
        .unwrap();
    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::Winback));
    assert_eq!(record.previous_lifecycle, Some(Lifecycle::Churned));

    // Winback lasts exactly one run; the plain cascade takes over after
    engine.run_classification(now).unwrap();
    assert_eq!(segments(&engine)["c1"].lifecycle, Some(Lifecycle::Active));
}

#[test]
fn winback_clears_on_following_run() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    engine
        .store()
        .insert_booking(&booking("b1", "c1", now - Duration::days(250), 900.0, "Hjulskift"))
        .unwrap();

    // Force the stored lifecycle to Churned, as if written by an earlier run
    engine
        .store()
        .upsert_lifecycle("c1", Lifecycle::Churned, None, now)
        .unwrap();

    engine.run_classification(now).unwrap();
    assert_eq!(segments(&engine)["c1"].lifecycle, Some(Lifecycle::Winback));

    engine.run_classification(now).unwrap();
    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::AtRisk));
    assert_eq!(record.previous_lifecycle, Some(Lifecycle::Winback));
}

#[test]
fn rerun_with_same_inputs_is_idempotent() {
    let engine = engine();
    let now = Utc::now();
    demo::seed(engine.store(), 50, now).unwrap();

    engine.run_classification(now).unwrap();
    let first = segments(&engine);
    let first_features = engine.store().load_features().unwrap();

    engine.run_classification(now).unwrap();
    let second = segments(&engine);
    let second_features = engine.store().load_features().unwrap();

    assert_eq!(first.len(), second.len());
    for (id, a) in &first {
        let b = &second[id];
        // Everything except the previous_lifecycle chain and timestamps
        // must be byte-for-byte stable across reruns
        assert_eq!(a.lifecycle, b.lifecycle, "lifecycle drifted for {id}");
        assert_eq!(a.value_tier, b.value_tier, "value tier drifted for {id}");
        assert_eq!(a.customer_segment, b.customer_segment);
        assert_eq!(a.pyramid_tier, b.pyramid_tier, "pyramid tier drifted for {id}");
        assert_eq!(a.composite_score, b.composite_score);
        assert_eq!(a.dormant_segment, b.dormant_segment);
    }

    // Feature rows must be just as stable, aside from the computed_at stamp
    assert_eq!(first_features.len(), second_features.len());
    for (a, b) in first_features.iter().zip(&second_features) {
        let id = &a.user_group_id;
        assert_eq!(a.user_group_id, b.user_group_id);
        assert_eq!(a.recency_days, b.recency_days, "recency drifted for {id}");
        assert_eq!(a.frequency_24m, b.frequency_24m);
        assert_eq!(a.revenue_24m, b.revenue_24m, "revenue drifted for {id}");
        assert_eq!(a.margin_24m, b.margin_24m);
        assert_eq!(a.discount_share_24m, b.discount_share_24m);
        assert_eq!(a.storage_active, b.storage_active);
        assert_eq!(a.categories, b.categories, "categories drifted for {id}");
        assert_eq!(a.tags, b.tags);
        assert_eq!(a.tenure_days, b.tenure_days);
        assert_eq!(a.lifetime_bookings, b.lifetime_bookings);
        assert_eq!(a.largest_tire_order, b.largest_tire_order);
        assert_eq!(a.first_booking_at, b.first_booking_at);
        assert_eq!(a.last_booking_at, b.last_booking_at);
    }
}

#[test]
fn value_tiers_cut_twenty_thirty_fifty() {
    let engine = engine();
    let now = Utc::now();
    // 100 customers with strictly increasing activity
    for i in 0..100 {
        let id = format!("c{i:03}");
        engine.store().upsert_customer(&b2c(&id, false)).unwrap();
        engine
            .store()
            .insert_booking(&booking(
                &format!("{id}-b"),
                &id,
                now - Duration::days(300 - (i as i64 * 2)),
                100.0 + i as f64 * 40.0,
                "Dekkskift",
            ))
            .unwrap();
    }

    engine.run_classification(now).unwrap();

    let all = segments(&engine);
    let count = |tier: ValueTier| {
        all.values()
            .filter(|r| r.value_tier == Some(tier))
            .count()
    };
    assert_eq!(count(ValueTier::High), 20);
    assert_eq!(count(ValueTier::Mid), 30);
    assert_eq!(count(ValueTier::Low), 50);
}

#[test]
fn every_classified_row_is_tier_xor_dormant() {
    let engine = engine();
    let now = Utc::now();
    demo::seed(engine.store(), 100, now).unwrap();

    engine.run_classification(now).unwrap();

    for (id, record) in segments(&engine) {
        assert_ne!(
            record.pyramid_tier.is_some(),
            record.dormant_segment.is_some(),
            "row {id} must hold exactly one of tier and dormant segment"
        );
        assert_eq!(
            record.composite_score.is_some(),
            record.pyramid_tier.is_some(),
            "composite score must accompany the tier for {id}"
        );
    }
}

#[test]
fn full_demo_run_passes_validation() {
    let engine = engine();
    let now = Utc::now();
    demo::seed(engine.store(), 200, now).unwrap();

    engine.run_classification(now).unwrap();
    let report = engine.validate().unwrap();

    assert_eq!(report.overall_status, CheckStatus::Pass, "{:#?}", report.checks);
    assert_eq!(report.summary.total, 200);
    assert_eq!(report.summary.with_features, 200);
    assert_eq!(report.summary.coverage_pct, 100.0);
}

#[test]
fn customers_without_bookings_still_get_classified() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("ghost", false)).unwrap();

    engine.run_classification(now).unwrap();

    let record = &segments(&engine)["ghost"];
    assert_eq!(record.lifecycle, Some(Lifecycle::Churned));
    assert_eq!(record.dormant_segment, Some(DormantSegment::Transient));
}

#[test]
fn cancelled_bookings_are_ignored() {
    let engine = engine();
    let now = Utc::now();
    engine.store().upsert_customer(&b2c("c1", false)).unwrap();
    let mut cancelled = booking("b1", "c1", now - Duration::days(5), 1000.0, "Hjulskift");
    cancelled.cancelled = true;
    engine.store().insert_booking(&cancelled).unwrap();

    engine.run_classification(now).unwrap();

    // The cancelled booking contributes nothing: no recency, churned
    let record = &segments(&engine)["c1"];
    assert_eq!(record.lifecycle, Some(Lifecycle::Churned));
}
