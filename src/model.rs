// Domain types shared by the store and the classification stages
//
// Everything the engine reads (customers, bookings, order lines) and
// everything it writes (feature records, segment records, validation
// reports) lives here. Using enums for the classification labels keeps
// the rule cascades exhaustive - adding a lifecycle stage or a tier is
// a compile error until every match is updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A billing/booking unit - one individual (B2C) or an organization (B2B).
///
/// Identity is immutable and owned by the ingestion layer; the engine
/// never creates or deletes customers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub user_group_id: String,
    /// None means B2C
    pub org_id: Option<String>,
    pub is_personal: bool,
    /// Vehicle count for B2B accounts, reported by ingestion
    pub fleet_size: Option<u32>,
    /// External storage/contract status flag (tire hotel agreement active)
    pub storage_status: bool,
}

impl Customer {
    /// Personal accounts and accounts without an organization are B2C
    pub fn is_b2c(&self) -> bool {
        self.is_personal || self.org_id.is_none()
    }
}

/// One service event belonging to exactly one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub user_group_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub booking_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub cancelled: bool,
    pub lines: Vec<OrderLine>,
}

impl Booking {
    /// Effective timestamp: first non-null of started_at, booking_date,
    /// completed_at. Bookings where all three are missing carry no usable
    /// time signal and are skipped by the aggregator.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.started_at.or(self.booking_date).or(self.completed_at)
    }

    /// Gross booking amount (sum of all line amounts, discounts included)
    pub fn gross_amount(&self) -> f64 {
        self.lines.iter().map(|l| l.amount).sum()
    }
}

/// A single order line on a booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub is_discount: bool,
    /// Free-text description, matched against the category keyword rules
    pub description: String,
}

/// Closed set of service categories used by the keyword tagger.
///
/// Deliberately not an open string map: the tagging rules and the metrics
/// schema must evolve together under version control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    WheelChange,
    Storage,
    Wash,
    Repair,
    TireShop,
}

impl ServiceCategory {
    /// All categories, in tagging-rule priority order
    pub const ALL: [ServiceCategory; 5] = [
        ServiceCategory::WheelChange,
        ServiceCategory::Storage,
        ServiceCategory::Wash,
        ServiceCategory::Repair,
        ServiceCategory::TireShop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::WheelChange => "wheel_change",
            ServiceCategory::Storage => "storage",
            ServiceCategory::Wash => "wash",
            ServiceCategory::Repair => "repair",
            ServiceCategory::TireShop => "tire_shop",
        }
    }
}

/// Per-category rollup inside a feature record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub frequency: u32,
    pub revenue: f64,
    pub margin: f64,
    /// None whenever frequency is zero
    pub last_booking_at: Option<DateTime<Utc>>,
}

/// Fixed-shape category breakdown: one metrics slot per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub wheel_change: CategoryMetrics,
    pub storage: CategoryMetrics,
    pub wash: CategoryMetrics,
    pub repair: CategoryMetrics,
    pub tire_shop: CategoryMetrics,
}

impl CategoryBreakdown {
    pub fn get(&self, category: ServiceCategory) -> &CategoryMetrics {
        match category {
            ServiceCategory::WheelChange => &self.wheel_change,
            ServiceCategory::Storage => &self.storage,
            ServiceCategory::Wash => &self.wash,
            ServiceCategory::Repair => &self.repair,
            ServiceCategory::TireShop => &self.tire_shop,
        }
    }

    pub fn get_mut(&mut self, category: ServiceCategory) -> &mut CategoryMetrics {
        match category {
            ServiceCategory::WheelChange => &mut self.wheel_change,
            ServiceCategory::Storage => &mut self.storage,
            ServiceCategory::Wash => &mut self.wash,
            ServiceCategory::Repair => &mut self.repair,
            ServiceCategory::TireShop => &mut self.tire_shop,
        }
    }

    /// Number of categories with at least one booking
    pub fn active_count(&self) -> usize {
        ServiceCategory::ALL
            .iter()
            .filter(|c| self.get(**c).frequency > 0)
            .count()
    }

    /// Sum of category revenues (must never exceed total 24m revenue)
    pub fn total_revenue(&self) -> f64 {
        ServiceCategory::ALL.iter().map(|c| self.get(*c).revenue).sum()
    }
}

/// One feature vector per customer, fully owned by the Feature Aggregator
/// and overwritten on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub user_group_id: String,
    /// Days since the most recent booking; None when there are no bookings
    pub recency_days: Option<i64>,
    /// Booking count in the trailing 24-month window
    pub frequency_24m: u32,
    /// Gross order-line revenue in the window
    pub revenue_24m: f64,
    /// revenue_24m x configured default margin percentage
    pub margin_24m: f64,
    /// Share of window revenue on discount-flagged lines (0 when revenue is 0)
    pub discount_share_24m: f64,
    /// Storage category active in-window OR external contract flag set
    pub storage_active: bool,
    pub categories: CategoryBreakdown,
    /// Derived relationship tags (storage_customer, fleet_customer, ...)
    pub tags: Vec<String>,
    /// Days since the first booking ever; None when there are no bookings
    pub tenure_days: Option<i64>,
    pub lifetime_bookings: u32,
    /// Largest single tire-shop order line ever, in NOK
    pub largest_tire_order: Option<f64>,
    pub first_booking_at: Option<DateTime<Utc>>,
    pub last_booking_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn is_storage_customer(&self) -> bool {
        self.storage_active
    }

    /// Fleet relationship signal: repeated wash bookings in the window
    pub fn is_fleet_customer(&self, fleet_wash_min: u32) -> bool {
        self.categories.wash.frequency > fleet_wash_min
    }

    pub fn is_multi_service(&self) -> bool {
        self.categories.active_count() >= 2
    }
}

/// Lifecycle stage - temporal classification of booking recency and tenure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    New,
    Active,
    AtRisk,
    Churned,
    Winback,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::New => "new",
            Lifecycle::Active => "active",
            Lifecycle::AtRisk => "at_risk",
            Lifecycle::Churned => "churned",
            Lifecycle::Winback => "winback",
        }
    }

    pub fn parse(s: &str) -> Option<Lifecycle> {
        match s {
            "new" => Some(Lifecycle::New),
            "active" => Some(Lifecycle::Active),
            "at_risk" => Some(Lifecycle::AtRisk),
            "churned" => Some(Lifecycle::Churned),
            "winback" => Some(Lifecycle::Winback),
            _ => None,
        }
    }

    /// Lifecycles eligible for pyramid tiering (everything except Churned)
    pub fn is_pyramid_eligible(&self) -> bool {
        !matches!(self, Lifecycle::Churned)
    }
}

/// Population-relative value band from the weighted RFM composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTier {
    High,
    Mid,
    Low,
}

impl ValueTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueTier::High => "high",
            ValueTier::Mid => "mid",
            ValueTier::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<ValueTier> {
        match s {
            "high" => Some(ValueTier::High),
            "mid" => Some(ValueTier::Mid),
            "low" => Some(ValueTier::Low),
            _ => None,
        }
    }
}

/// B2C/SMB/Large/Enterprise bucket used to normalize scores fairly across
/// very different scales of spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSegment {
    B2c,
    Smb,
    Large,
    Enterprise,
}

impl CustomerSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerSegment::B2c => "b2c",
            CustomerSegment::Smb => "smb",
            CustomerSegment::Large => "large",
            CustomerSegment::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<CustomerSegment> {
        match s {
            "b2c" => Some(CustomerSegment::B2c),
            "smb" => Some(CustomerSegment::Smb),
            "large" => Some(CustomerSegment::Large),
            "enterprise" => Some(CustomerSegment::Enterprise),
            _ => None,
        }
    }
}

/// Engagement/value band, Champion (1) down to Prospect (4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PyramidTier {
    Champion,
    Loyalist,
    Engaged,
    Prospect,
}

impl PyramidTier {
    pub fn rank(&self) -> u8 {
        match self {
            PyramidTier::Champion => 1,
            PyramidTier::Loyalist => 2,
            PyramidTier::Engaged => 3,
            PyramidTier::Prospect => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PyramidTier::Champion => "Champion",
            PyramidTier::Loyalist => "Loyalist",
            PyramidTier::Engaged => "Engaged",
            PyramidTier::Prospect => "Prospect",
        }
    }

    pub fn from_rank(rank: u8) -> Option<PyramidTier> {
        match rank {
            1 => Some(PyramidTier::Champion),
            2 => Some(PyramidTier::Loyalist),
            3 => Some(PyramidTier::Engaged),
            4 => Some(PyramidTier::Prospect),
            _ => None,
        }
    }
}

/// Sub-classification of customers outside the pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DormantSegment {
    /// Recently churned, recoverable
    Salvageable,
    /// One-time or long-gone, unlikely to return
    Transient,
}

impl DormantSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            DormantSegment::Salvageable => "salvageable",
            DormantSegment::Transient => "transient",
        }
    }

    pub fn parse(s: &str) -> Option<DormantSegment> {
        match s {
            "salvageable" => Some(DormantSegment::Salvageable),
            "transient" => Some(DormantSegment::Transient),
            _ => None,
        }
    }
}

/// One segment row per customer. Each classifier stage updates only the
/// fields it owns and never resets fields owned by another stage:
/// lifecycle fields belong to the Lifecycle Classifier, value_tier to the
/// Value Tier Scorer, the rest to the Pyramid Tier Assigner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub user_group_id: String,
    pub lifecycle: Option<Lifecycle>,
    pub previous_lifecycle: Option<Lifecycle>,
    pub value_tier: Option<ValueTier>,
    pub customer_segment: Option<CustomerSegment>,
    /// 1-4; None routes the customer to the dormant pool
    pub pyramid_tier: Option<PyramidTier>,
    /// Defined iff pyramid_tier is non-null
    pub composite_score: Option<f64>,
    /// Defined iff pyramid_tier is null
    pub dormant_segment: Option<DormantSegment>,
    pub fleet_size: Option<u32>,
    pub high_value_tire_purchaser: bool,
    pub next_tier_requirements: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SegmentRecord {
    /// Empty record for a customer not yet classified
    pub fn empty(user_group_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_group_id: user_group_id.to_string(),
            lifecycle: None,
            previous_lifecycle: None,
            value_tier: None,
            customer_segment: None,
            pyramid_tier: None,
            composite_score: None,
            dormant_segment: None,
            fleet_size: None,
            high_value_tire_purchaser: false,
            next_tier_requirements: None,
            updated_at: now,
        }
    }
}

/// Outcome of one "run classification" invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub processed_count: usize,
    pub duration_seconds: f64,
}

/// Status of a single validation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warning,
    Fail,
}

impl CheckStatus {
    /// Severity for worst-of aggregation: fail > warning > pass
    fn severity(&self) -> u8 {
        match self {
            CheckStatus::Pass => 0,
            CheckStatus::Warning => 1,
            CheckStatus::Fail => 2,
        }
    }

    pub fn worst(self, other: CheckStatus) -> CheckStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Raw counts behind a check verdict, so operators can see the numbers
/// and not just the verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckCounts {
    pub total: i64,
    pub covered: i64,
}

/// One named validation check result. Findings are data, never errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub counts: CheckCounts,
}

/// Population coverage summary attached to every report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: i64,
    pub with_features: i64,
    pub with_segments: i64,
    pub with_pyramid: i64,
    pub coverage_pct: f64,
}

/// Structured validation report returned by the "validate" operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub overall_status: CheckStatus,
    pub checks: Vec<ValidationCheck>,
    pub summary: ValidationSummary,
}
