// Classification engine - stage orchestration over the store
//
// One "run" executes the stages in fixed order: feature aggregation,
// lifecycle classification, value tier scoring, pyramid assignment,
// then the data quality checks. Each stage is recorded in run_log as
// running/completed/error so a scheduled caller can see where a failed
// run stopped. A missing or malformed threshold record aborts the run
// before any stage starts; a bad individual customer is skipped and
// logged, never fatal.

pub mod features;
pub mod lifecycle;
pub mod pyramid;
pub mod validation;
pub mod value_tier;

use crate::model::{
    CheckStatus, Customer, CustomerSegment, FeatureRecord, Lifecycle, RunOutcome, ValidationReport,
};
use crate::store::Store;
use crate::thresholds::ThresholdConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

pub struct Engine {
    store: Store,
}

impl Engine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run the full classification pipeline as of `now`.
    ///
    /// `now` is taken as a parameter rather than sampled per stage so a
    /// whole run shares one reference time and reruns are reproducible
    /// in tests.
    pub fn run_classification(&self, now: DateTime<Utc>) -> Result<RunOutcome> {
        let started = Instant::now();

        let thresholds = self
            .store
            .load_thresholds()
            .context("loading threshold configuration")?;
        let customers = self.store.load_customers()?;
        info!("Starting classification run over {} customers", customers.len());

        let features = self.features_stage(&customers, &thresholds, now)?;
        let lifecycles = self.lifecycle_stage(&features, &thresholds, now)?;
        let scores = self.value_tier_stage(&features, &thresholds, now)?;
        self.pyramid_stage(&customers, &features, &lifecycles, &scores, &thresholds, now)?;
        self.validation_stage(now)?;

        let outcome = RunOutcome {
            processed_count: features.len(),
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "Classification run finished: {} customers in {:.2}s",
            outcome.processed_count, outcome.duration_seconds
        );
        Ok(outcome)
    }

    /// Run the data quality checks without reclassifying anything
    pub fn validate(&self) -> Result<ValidationReport> {
        validation::run_checks(self.store.connection())
    }

    // ---- stages ---------------------------------------------------------

    /// Stage 1: one feature record per customer. Customers whose data
    /// cannot be aggregated are skipped and logged; the run continues.
    fn features_stage(
        &self,
        customers: &[Customer],
        thresholds: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeatureRecord>> {
        let run_id = self.store.stage_started("features", now)?;
        let result = (|| -> Result<(Vec<FeatureRecord>, usize)> {
            let bookings = self.store.load_bookings_by_customer()?;
            let empty = Vec::new();

            let mut records = Vec::with_capacity(customers.len());
            let mut skipped = 0usize;
            for customer in customers {
                let customer_bookings = bookings.get(&customer.user_group_id).unwrap_or(&empty);
                match features::aggregate_customer(customer, customer_bookings, thresholds, now) {
                    Ok(feature) => {
                        self.store.upsert_feature(&feature)?;
                        records.push(feature);
                    }
                    Err(err) => {
                        warn!(
                            "Skipping customer {} in feature aggregation: {err:#}",
                            customer.user_group_id
                        );
                        skipped += 1;
                    }
                }
            }
            Ok((records, skipped))
        })();

        match result {
            Ok((records, skipped)) => {
                self.store
                    .stage_completed(run_id, records.len(), skipped, Utc::now())?;
                info!(
                    "Feature aggregation: {} records, {} skipped",
                    records.len(),
                    skipped
                );
                Ok(records)
            }
            Err(err) => {
                self.store.stage_failed(run_id, &format!("{err:#}"), Utc::now())?;
                Err(err)
            }
        }
    }

    /// Stage 2: lifecycle cascade plus Winback transition. The stored
    /// lifecycle is read before anything is written, so the transition
    /// always compares against the previous run.
    fn lifecycle_stage(
        &self,
        features: &[FeatureRecord],
        thresholds: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, Lifecycle>> {
        let run_id = self.store.stage_started("lifecycle", now)?;
        let result = (|| -> Result<HashMap<String, Lifecycle>> {
            let prior = self.store.load_segments()?;

            let mut assigned = HashMap::with_capacity(features.len());
            for feature in features {
                let cascade = lifecycle::classify(feature, thresholds);
                let prior_lifecycle = prior
                    .get(&feature.user_group_id)
                    .and_then(|record| record.lifecycle);
                let resolved = lifecycle::resolve_transition(cascade, prior_lifecycle);

                self.store
                    .upsert_lifecycle(&feature.user_group_id, resolved, prior_lifecycle, now)?;
                assigned.insert(feature.user_group_id.clone(), resolved);
            }
            Ok(assigned)
        })();

        match result {
            Ok(assigned) => {
                self.store.stage_completed(run_id, assigned.len(), 0, Utc::now())?;
                info!("Lifecycle classification: {} customers", assigned.len());
                Ok(assigned)
            }
            Err(err) => {
                self.store.stage_failed(run_id, &format!("{err:#}"), Utc::now())?;
                Err(err)
            }
        }
    }

    /// Stage 3: population-relative RFM scoring and the High/Mid/Low cut
    fn value_tier_stage(
        &self,
        features: &[FeatureRecord],
        thresholds: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<value_tier::CustomerScore>> {
        let run_id = self.store.stage_started("value_tier", now)?;
        let result = (|| -> Result<Vec<value_tier::CustomerScore>> {
            let scores = value_tier::score_population(features, thresholds);
            let tiers = value_tier::assign_value_tiers(&scores, thresholds);
            for (user_group_id, tier) in &tiers {
                self.store.update_value_tier(user_group_id, *tier, now)?;
            }
            Ok(scores)
        })();

        match result {
            Ok(scores) => {
                self.store.stage_completed(run_id, scores.len(), 0, Utc::now())?;
                info!("Value tier scoring: {} customers", scores.len());
                Ok(scores)
            }
            Err(err) => {
                self.store.stage_failed(run_id, &format!("{err:#}"), Utc::now())?;
                Err(err)
            }
        }
    }

    /// Stage 4: segment bucketing, within-segment normalization and the
    /// tier cascade
    fn pyramid_stage(
        &self,
        customers: &[Customer],
        features: &[FeatureRecord],
        lifecycles: &HashMap<String, Lifecycle>,
        scores: &[value_tier::CustomerScore],
        thresholds: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let run_id = self.store.stage_started("pyramid", now)?;
        let result = (|| -> Result<usize> {
            let by_id: HashMap<&str, &Customer> = customers
                .iter()
                .map(|c| (c.user_group_id.as_str(), c))
                .collect();

            let segments: HashMap<String, CustomerSegment> = features
                .iter()
                .filter_map(|f| {
                    by_id
                        .get(f.user_group_id.as_str())
                        .map(|c| (f.user_group_id.clone(), pyramid::segment_for(c, thresholds)))
                })
                .collect();
            let composites = pyramid::normalize_within_segments(scores, &segments);

            let mut processed = 0usize;
            for feature in features {
                let Some(customer) = by_id.get(feature.user_group_id.as_str()) else {
                    continue;
                };
                let Some(lifecycle) = lifecycles.get(&feature.user_group_id) else {
                    continue;
                };
                let segment = segments[&feature.user_group_id];
                let composite = composites
                    .get(&feature.user_group_id)
                    .copied()
                    .unwrap_or(0.0);

                let assignment =
                    pyramid::assign(feature, *lifecycle, segment, composite, thresholds);
                self.store.update_pyramid(
                    &feature.user_group_id,
                    assignment.customer_segment,
                    assignment.tier,
                    assignment.composite,
                    assignment.dormant,
                    customer.fleet_size,
                    assignment.high_value_tire_purchaser,
                    assignment.next_tier_requirements.as_deref(),
                    now,
                )?;
                processed += 1;
            }
            Ok(processed)
        })();

        match result {
            Ok(processed) => {
                self.store.stage_completed(run_id, processed, 0, Utc::now())?;
                info!("Pyramid assignment: {} customers", processed);
                Ok(())
            }
            Err(err) => {
                self.store.stage_failed(run_id, &format!("{err:#}"), Utc::now())?;
                Err(err)
            }
        }
    }

    /// Stage 5: data quality checks. Findings are logged, never fatal.
    fn validation_stage(&self, now: DateTime<Utc>) -> Result<()> {
        let run_id = self.store.stage_started("validation", now)?;
        match validation::run_checks(self.store.connection()) {
            Ok(report) => {
                self.store
                    .stage_completed(run_id, report.checks.len(), 0, Utc::now())?;
                match report.overall_status {
                    CheckStatus::Pass => info!("Validation: all checks passed"),
                    status => {
                        for check in report
                            .checks
                            .iter()
                            .filter(|c| c.status != CheckStatus::Pass)
                        {
                            warn!("Validation check {}: {}", check.name, check.message);
                        }
                        warn!("Validation finished with overall status {status:?}");
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.store.stage_failed(run_id, &format!("{err:#}"), Utc::now())?;
                Err(err)
            }
        }
    }
}
