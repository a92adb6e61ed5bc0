// Lifecycle Classifier - deterministic rule cascade over the feature
// record, plus the Winback transition check
//
// The cascade is a pure function of the feature record and the threshold
// record: same inputs, same label, every rerun. Winback is derived
// separately by comparing against the lifecycle stored on the previous
// run, and that comparison must happen before the new value is written -
// previous_lifecycle always carries the prior value, never the post-hoc
// one.

use crate::model::{FeatureRecord, Lifecycle};
use crate::thresholds::{months_from_days, ThresholdConfig};

/// The fixed-order rule cascade, first match wins:
/// 1. first booking within new_days           -> New
/// 2. storage contract active                  -> Active
/// 3. last booking within active_months        -> Active
/// 4. last booking in the at-risk band         -> At-risk
/// 5. otherwise                                -> Churned
pub fn classify(feature: &FeatureRecord, thresholds: &ThresholdConfig) -> Lifecycle {
    if let Some(tenure) = feature.tenure_days {
        if tenure <= thresholds.new_days {
            return Lifecycle::New;
        }
    }

    if feature.storage_active {
        return Lifecycle::Active;
    }

    let Some(recency) = feature.recency_days else {
        // No bookings and no storage contract: nothing retains them
        return Lifecycle::Churned;
    };
    let months = months_from_days(recency);

    if months <= thresholds.active_months {
        return Lifecycle::Active;
    }
    if months > thresholds.at_risk_from_months && months <= thresholds.at_risk_to_months {
        return Lifecycle::AtRisk;
    }
    Lifecycle::Churned
}

/// Winback derivation, compare-before-write.
///
/// `prior` is the lifecycle stored before this run writes anything. A
/// customer coming back from Churned into an active booking state is
/// Winback until the next run reclassifies them through the plain
/// cascade.
pub fn resolve_transition(cascade: Lifecycle, prior: Option<Lifecycle>) -> Lifecycle {
    match (prior, cascade) {
        (Some(Lifecycle::Churned), Lifecycle::Active | Lifecycle::AtRisk) => Lifecycle::Winback,
        _ => cascade,
    }
}
