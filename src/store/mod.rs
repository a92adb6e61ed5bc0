// SQLite store for the classification engine
//
// The persistence contract is deliberately simple: upsert-by-key and
// range scans over a handful of tables. Customers, bookings and order
// lines are written by the (out-of-scope) ingestion layer; the engine
// owns customer_features and customer_segments and overwrites its own
// columns on every run. Write side is a single connection in WAL mode;
// the read side used for validation/reporting lives in report.rs on an
// r2d2 pool.

pub mod report;

use crate::model::{
    Booking, Customer, CustomerSegment, DormantSegment, FeatureRecord, Lifecycle, OrderLine,
    PyramidTier, SegmentRecord, ValueTier,
};
use crate::thresholds::ThresholdConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Write-side handle to the engine database
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (and migrate) the database at the given path
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {:?}", parent))?;
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("opening database {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Raw connection access for the demo seeder
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ---- schema ---------------------------------------------------------

    /// Check current schema version and apply pending migrations
    fn init_schema(&self) -> Result<()> {
        let current_version: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(
                    (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
                    0
                )",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            self.apply_schema_v1()?;
        }
        if current_version < 2 {
            self.migrate_v1_to_v2()?;
        }

        Ok(())
    }

    /// Initial schema (v1)
    fn apply_schema_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Metadata table (created first for version tracking)
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            -- Customers (owned by ingestion, read-only for the engine)
            CREATE TABLE IF NOT EXISTS customers (
                user_group_id TEXT PRIMARY KEY,
                org_id TEXT,            -- NULL means B2C
                is_personal INTEGER NOT NULL DEFAULT 0,
                fleet_size INTEGER,
                storage_status INTEGER NOT NULL DEFAULT 0
            );

            -- Bookings (owned by ingestion)
            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                user_group_id TEXT NOT NULL,
                started_at TEXT,
                booking_date TEXT,
                completed_at TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0,

                FOREIGN KEY (user_group_id) REFERENCES customers(user_group_id)
            );
            CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(user_group_id);
            CREATE INDEX IF NOT EXISTS idx_bookings_started ON bookings(started_at);

            -- Order lines (owned by ingestion)
            CREATE TABLE IF NOT EXISTS order_lines (
                id TEXT PRIMARY KEY,
                booking_id TEXT NOT NULL,
                amount REAL NOT NULL DEFAULT 0,
                currency TEXT NOT NULL DEFAULT 'NOK',
                is_discount INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',

                FOREIGN KEY (booking_id) REFERENCES bookings(id)
            );
            CREATE INDEX IF NOT EXISTS idx_lines_booking ON order_lines(booking_id);

            -- Feature records (owned by the Feature Aggregator, one per customer)
            CREATE TABLE IF NOT EXISTS customer_features (
                user_group_id TEXT PRIMARY KEY,
                recency_days INTEGER,
                frequency_24m INTEGER NOT NULL DEFAULT 0,
                revenue_24m REAL NOT NULL DEFAULT 0,
                margin_24m REAL NOT NULL DEFAULT 0,
                discount_share_24m REAL NOT NULL DEFAULT 0,
                storage_active INTEGER NOT NULL DEFAULT 0,
                category_metrics TEXT NOT NULL DEFAULT '{}',
                tags TEXT NOT NULL DEFAULT '[]',
                tenure_days INTEGER,
                lifetime_bookings INTEGER NOT NULL DEFAULT 0,
                largest_tire_order REAL,
                first_booking_at TEXT,
                last_booking_at TEXT,
                computed_at TEXT NOT NULL,

                FOREIGN KEY (user_group_id) REFERENCES customers(user_group_id)
            );

            -- Segment records (columns owned per classifier stage)
            CREATE TABLE IF NOT EXISTS customer_segments (
                user_group_id TEXT PRIMARY KEY,
                lifecycle TEXT,
                previous_lifecycle TEXT,
                value_tier TEXT,
                customer_segment TEXT,
                pyramid_tier INTEGER,
                pyramid_tier_name TEXT,
                composite_score REAL,
                dormant_segment TEXT,
                fleet_size INTEGER,
                high_value_tire_purchaser INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,

                FOREIGN KEY (user_group_id) REFERENCES customers(user_group_id)
            );
            CREATE INDEX IF NOT EXISTS idx_segments_lifecycle ON customer_segments(lifecycle);
            CREATE INDEX IF NOT EXISTS idx_segments_tier ON customer_segments(pyramid_tier);

            -- Versioned threshold record (singleton row)
            CREATE TABLE IF NOT EXISTS threshold_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Per-stage batch status (running/completed/error), so the next
            -- scheduled run can see what happened and retry
            CREATE TABLE IF NOT EXISTS run_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_run_log_stage ON run_log(stage, started_at);

            -- Set initial version
            INSERT INTO metadata (key, value) VALUES ('schema_version', '1');
            "#,
        )?;

        // Seed the threshold record so a fresh database is runnable.
        // Operators tune it afterwards; a missing record at run time is
        // still treated as a fatal configuration error.
        let defaults = ThresholdConfig::default();
        self.save_thresholds(&defaults)?;

        tracing::info!("Initialized engine database schema (v1)");
        Ok(())
    }

    /// Migration from v1 to v2 (adds next_tier_requirements to segments)
    ///
    /// Idempotent - safe to run multiple times. If the process crashes
    /// between ALTER TABLE and the metadata update, the next startup
    /// retries the migration.
    fn migrate_v1_to_v2(&self) -> Result<()> {
        let has_column: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('customer_segments')
             WHERE name='next_tier_requirements'",
            [],
            |row| row.get(0),
        )?;

        if !has_column {
            self.conn.execute(
                "ALTER TABLE customer_segments ADD COLUMN next_tier_requirements TEXT",
                [],
            )?;
        }

        self.conn.execute(
            "UPDATE metadata SET value = '2' WHERE key = 'schema_version'",
            [],
        )?;

        tracing::info!("Migrated engine database from v1 to v2 (added next_tier_requirements)");
        Ok(())
    }

    // ---- threshold record -----------------------------------------------

    /// Load the versioned threshold record.
    ///
    /// Missing or malformed records are fatal: every downstream rule
    /// depends on them and a partial run with guessed thresholds would be
    /// worse than no run.
    pub fn load_thresholds(&self) -> Result<ThresholdConfig> {
        let payload: Option<String> = self
            .conn
            .query_row("SELECT payload FROM threshold_config WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(payload) = payload else {
            bail!("threshold configuration record is missing; seed it before running");
        };

        let thresholds: ThresholdConfig = serde_json::from_str(&payload)
            .context("threshold configuration record is malformed")?;
        thresholds
            .validate()
            .context("threshold configuration record failed validation")?;
        Ok(thresholds)
    }

    /// Upsert the singleton threshold record
    pub fn save_thresholds(&self, thresholds: &ThresholdConfig) -> Result<()> {
        let payload = serde_json::to_string(thresholds)?;
        self.conn.execute(
            "INSERT INTO threshold_config (id, version, payload, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 version = excluded.version,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            params![thresholds.version, payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ---- ingestion-side rows (used by the demo seeder and tests) --------

    pub fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        self.conn.execute(
            "INSERT INTO customers (user_group_id, org_id, is_personal, fleet_size, storage_status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_group_id) DO UPDATE SET
                 org_id = excluded.org_id,
                 is_personal = excluded.is_personal,
                 fleet_size = excluded.fleet_size,
                 storage_status = excluded.storage_status",
            params![
                customer.user_group_id,
                customer.org_id,
                customer.is_personal as i32,
                customer.fleet_size,
                customer.storage_status as i32
            ],
        )?;
        Ok(())
    }

    pub fn insert_booking(&self, booking: &Booking) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bookings
                 (id, user_group_id, started_at, booking_date, completed_at, completed, cancelled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                booking.id,
                booking.user_group_id,
                booking.started_at.map(|t| t.to_rfc3339()),
                booking.booking_date.map(|t| t.to_rfc3339()),
                booking.completed_at.map(|t| t.to_rfc3339()),
                booking.completed as i32,
                booking.cancelled as i32
            ],
        )?;
        for line in &booking.lines {
            self.conn.execute(
                "INSERT OR REPLACE INTO order_lines
                     (id, booking_id, amount, currency, is_discount, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    line.id,
                    booking.id,
                    line.amount,
                    line.currency,
                    line.is_discount as i32,
                    line.description
                ],
            )?;
        }
        Ok(())
    }

    // ---- range scans ----------------------------------------------------

    /// Full customer population
    pub fn load_customers(&self) -> Result<Vec<Customer>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_group_id, org_id, is_personal, fleet_size, storage_status
             FROM customers ORDER BY user_group_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Customer {
                user_group_id: row.get(0)?,
                org_id: row.get(1)?,
                is_personal: row.get::<_, i32>(2)? != 0,
                fleet_size: row.get(3)?,
                storage_status: row.get::<_, i32>(4)? != 0,
            })
        })?;

        let mut customers = Vec::new();
        for row in rows {
            customers.push(row?);
        }
        Ok(customers)
    }

    /// All bookings with their order lines, grouped by customer.
    ///
    /// Two sequential scans instead of a join: the line scan attaches to
    /// bookings in memory, which keeps the row mapping simple and avoids
    /// duplicating booking columns per line.
    pub fn load_bookings_by_customer(&self) -> Result<HashMap<String, Vec<Booking>>> {
        let mut by_id: HashMap<String, Booking> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, user_group_id, started_at, booking_date, completed_at,
                        completed, cancelled
                 FROM bookings",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i32>(5)?,
                    row.get::<_, i32>(6)?,
                ))
            })?;
            for row in rows {
                let (id, user_group_id, started, date, completed_at, completed, cancelled) = row?;
                let booking = Booking {
                    id: id.clone(),
                    user_group_id,
                    started_at: parse_ts_opt(started)?,
                    booking_date: parse_ts_opt(date)?,
                    completed_at: parse_ts_opt(completed_at)?,
                    completed: completed != 0,
                    cancelled: cancelled != 0,
                    lines: Vec::new(),
                };
                by_id.insert(id, booking);
            }
        }

        {
            let mut stmt = self.conn.prepare(
                "SELECT id, booking_id, amount, currency, is_discount, description
                 FROM order_lines",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i32>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            for row in rows {
                let (id, booking_id, amount, currency, is_discount, description) = row?;
                if let Some(booking) = by_id.get_mut(&booking_id) {
                    booking.lines.push(OrderLine {
                        id,
                        amount,
                        currency,
                        is_discount: is_discount != 0,
                        description,
                    });
                } else {
                    // Orphaned line: ingestion delivers at-least-once and
                    // out of order, so this is data noise, not an error
                    tracing::debug!("Order line {} references unknown booking {}", id, booking_id);
                }
            }
        }

        let mut grouped: HashMap<String, Vec<Booking>> = HashMap::new();
        for booking in by_id.into_values() {
            grouped
                .entry(booking.user_group_id.clone())
                .or_default()
                .push(booking);
        }
        Ok(grouped)
    }

    /// All feature records, ordered by customer key for deterministic runs
    pub fn load_features(&self) -> Result<Vec<FeatureRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_group_id, recency_days, frequency_24m, revenue_24m, margin_24m,
                    discount_share_24m, storage_active, category_metrics, tags, tenure_days,
                    lifetime_bookings, largest_tire_order, first_booking_at, last_booking_at,
                    computed_at
             FROM customer_features ORDER BY user_group_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i32>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<i64>>(9)?,
                row.get::<_, u32>(10)?,
                row.get::<_, Option<f64>>(11)?,
                row.get::<_, Option<String>>(12)?,
                row.get::<_, Option<String>>(13)?,
                row.get::<_, String>(14)?,
            ))
        })?;

        let mut features = Vec::new();
        for row in rows {
            let (
                user_group_id,
                recency_days,
                frequency_24m,
                revenue_24m,
                margin_24m,
                discount_share_24m,
                storage_active,
                category_metrics,
                tags,
                tenure_days,
                lifetime_bookings,
                largest_tire_order,
                first_booking_at,
                last_booking_at,
                computed_at,
            ) = row?;
            features.push(FeatureRecord {
                user_group_id,
                recency_days,
                frequency_24m,
                revenue_24m,
                margin_24m,
                discount_share_24m,
                storage_active: storage_active != 0,
                categories: serde_json::from_str(&category_metrics)
                    .context("malformed category_metrics payload")?,
                tags: serde_json::from_str(&tags).context("malformed tags payload")?,
                tenure_days,
                lifetime_bookings,
                largest_tire_order,
                first_booking_at: parse_ts_opt(first_booking_at)?,
                last_booking_at: parse_ts_opt(last_booking_at)?,
                computed_at: parse_ts(&computed_at)?,
            });
        }
        Ok(features)
    }

    /// All segment records keyed by customer
    pub fn load_segments(&self) -> Result<HashMap<String, SegmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_group_id, lifecycle, previous_lifecycle, value_tier, customer_segment,
                    pyramid_tier, composite_score, dormant_segment, fleet_size,
                    high_value_tire_purchaser, next_tier_requirements, updated_at
             FROM customer_segments",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<u8>>(5)?,
                row.get::<_, Option<f64>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<u32>>(8)?,
                row.get::<_, i32>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
            ))
        })?;

        let mut segments = HashMap::new();
        for row in rows {
            let (
                user_group_id,
                lifecycle,
                previous_lifecycle,
                value_tier,
                customer_segment,
                pyramid_tier,
                composite_score,
                dormant_segment,
                fleet_size,
                high_value_tire_purchaser,
                next_tier_requirements,
                updated_at,
            ) = row?;
            let record = SegmentRecord {
                user_group_id: user_group_id.clone(),
                lifecycle: lifecycle.as_deref().and_then(Lifecycle::parse),
                previous_lifecycle: previous_lifecycle.as_deref().and_then(Lifecycle::parse),
                value_tier: value_tier.as_deref().and_then(ValueTier::parse),
                customer_segment: customer_segment.as_deref().and_then(CustomerSegment::parse),
                pyramid_tier: pyramid_tier.and_then(PyramidTier::from_rank),
                composite_score,
                dormant_segment: dormant_segment.as_deref().and_then(DormantSegment::parse),
                fleet_size,
                high_value_tire_purchaser: high_value_tire_purchaser != 0,
                next_tier_requirements,
                updated_at: parse_ts(&updated_at)?,
            };
            segments.insert(user_group_id, record);
        }
        Ok(segments)
    }

    // ---- engine-owned upserts -------------------------------------------

    /// Upsert exactly one feature row per customer (idempotent)
    pub fn upsert_feature(&self, feature: &FeatureRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO customer_features
                 (user_group_id, recency_days, frequency_24m, revenue_24m, margin_24m,
                  discount_share_24m, storage_active, category_metrics, tags, tenure_days,
                  lifetime_bookings, largest_tire_order, first_booking_at, last_booking_at,
                  computed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(user_group_id) DO UPDATE SET
                 recency_days = excluded.recency_days,
                 frequency_24m = excluded.frequency_24m,
                 revenue_24m = excluded.revenue_24m,
                 margin_24m = excluded.margin_24m,
                 discount_share_24m = excluded.discount_share_24m,
                 storage_active = excluded.storage_active,
                 category_metrics = excluded.category_metrics,
                 tags = excluded.tags,
                 tenure_days = excluded.tenure_days,
                 lifetime_bookings = excluded.lifetime_bookings,
                 largest_tire_order = excluded.largest_tire_order,
                 first_booking_at = excluded.first_booking_at,
                 last_booking_at = excluded.last_booking_at,
                 computed_at = excluded.computed_at",
            params![
                feature.user_group_id,
                feature.recency_days,
                feature.frequency_24m,
                feature.revenue_24m,
                feature.margin_24m,
                feature.discount_share_24m,
                feature.storage_active as i32,
                serde_json::to_string(&feature.categories)?,
                serde_json::to_string(&feature.tags)?,
                feature.tenure_days,
                feature.lifetime_bookings,
                feature.largest_tire_order,
                feature.first_booking_at.map(|t| t.to_rfc3339()),
                feature.last_booking_at.map(|t| t.to_rfc3339()),
                feature.computed_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Lifecycle Classifier columns only; other stage columns untouched
    pub fn upsert_lifecycle(
        &self,
        user_group_id: &str,
        lifecycle: Lifecycle,
        previous_lifecycle: Option<Lifecycle>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO customer_segments (user_group_id, lifecycle, previous_lifecycle, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_group_id) DO UPDATE SET
                 lifecycle = excluded.lifecycle,
                 previous_lifecycle = excluded.previous_lifecycle,
                 updated_at = excluded.updated_at",
            params![
                user_group_id,
                lifecycle.as_str(),
                previous_lifecycle.map(|l| l.as_str()),
                updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Value Tier Scorer column only
    pub fn update_value_tier(
        &self,
        user_group_id: &str,
        value_tier: ValueTier,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE customer_segments
             SET value_tier = ?2, updated_at = ?3
             WHERE user_group_id = ?1",
            params![user_group_id, value_tier.as_str(), updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Pyramid Tier Assigner columns: segment, tier/dormant pair,
    /// composite score, fleet size, purchase flag and the next-tier hint
    #[allow(clippy::too_many_arguments)]
    pub fn update_pyramid(
        &self,
        user_group_id: &str,
        customer_segment: CustomerSegment,
        pyramid_tier: Option<PyramidTier>,
        composite_score: Option<f64>,
        dormant_segment: Option<DormantSegment>,
        fleet_size: Option<u32>,
        high_value_tire_purchaser: bool,
        next_tier_requirements: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE customer_segments
             SET customer_segment = ?2,
                 pyramid_tier = ?3,
                 pyramid_tier_name = ?4,
                 composite_score = ?5,
                 dormant_segment = ?6,
                 fleet_size = ?7,
                 high_value_tire_purchaser = ?8,
                 next_tier_requirements = ?9,
                 updated_at = ?10
             WHERE user_group_id = ?1",
            params![
                user_group_id,
                customer_segment.as_str(),
                pyramid_tier.map(|t| t.rank()),
                pyramid_tier.map(|t| t.name()),
                composite_score,
                dormant_segment.map(|d| d.as_str()),
                fleet_size,
                high_value_tire_purchaser as i32,
                next_tier_requirements,
                updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ---- run log --------------------------------------------------------

    /// Mark a stage as running; returns the row id for the later update
    pub fn stage_started(&self, stage: &str, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO run_log (stage, status, started_at) VALUES (?1, 'running', ?2)",
            params![stage, now.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn stage_completed(
        &self,
        run_id: i64,
        processed: usize,
        skipped: usize,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE run_log
             SET status = 'completed', finished_at = ?2, processed = ?3, skipped = ?4
             WHERE id = ?1",
            params![run_id, now.to_rfc3339(), processed as i64, skipped as i64],
        )?;
        Ok(())
    }

    pub fn stage_failed(&self, run_id: i64, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE run_log
             SET status = 'error', finished_at = ?2, error = ?3
             WHERE id = ?1",
            params![run_id, now.to_rfc3339(), error],
        )?;
        Ok(())
    }

    /// Latest run_log status per stage (for the CLI status line)
    pub fn last_stage_statuses(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, status FROM run_log r
             WHERE id = (SELECT MAX(id) FROM run_log WHERE stage = r.stage)
             ORDER BY stage",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut statuses = Vec::new();
        for row in rows {
            statuses.push(row?);
        }
        Ok(statuses)
    }
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("unparseable timestamp {value:?}"))?
        .with_timezone(&Utc))
}

fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}
