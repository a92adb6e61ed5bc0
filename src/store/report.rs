//! Read-side query interface for the engine database
//!
//! Used by the CLI status/validate paths. The write side holds a single
//! connection in WAL mode; this side manages a small r2d2 pool of reader
//! connections so reporting never blocks a running classification batch.

use crate::model::CheckCounts;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Customer counts per lifecycle stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleDistribution {
    pub lifecycle: String,
    pub customers: i64,
}

/// Customer counts per pyramid tier (dormant customers excluded)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierDistribution {
    pub tier: String,
    pub customers: i64,
    pub avg_composite: f64,
}

/// One-screen overview of the classified population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationOverview {
    pub customers: i64,
    pub features: CheckCounts,
    pub lifecycles: Vec<LifecycleDistribution>,
    pub tiers: Vec<TierDistribution>,
    pub dormant_salvageable: i64,
    pub dormant_transient: i64,
    pub last_run_at: Option<String>,
}

/// Pooled read-only handle to the engine database
pub struct ReportQuery {
    pool: Pool<SqliteConnectionManager>,
}

impl ReportQuery {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4) // Read-only pool for concurrent queries
            .build(manager)?;

        // Verify connection works
        let conn = pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> anyhow::Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Aggregate the current classification state for the status command
    pub fn population_overview(&self) -> anyhow::Result<PopulationOverview> {
        let conn = self.conn()?;

        let customers: i64 =
            conn.query_row("SELECT COUNT(*) FROM customers", [], |row| row.get(0))?;
        let with_features: i64 = conn.query_row(
            "SELECT COUNT(*) FROM customer_features",
            [],
            |row| row.get(0),
        )?;

        let mut lifecycles = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT lifecycle, COUNT(*) FROM customer_segments
                 WHERE lifecycle IS NOT NULL
                 GROUP BY lifecycle ORDER BY COUNT(*) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(LifecycleDistribution {
                    lifecycle: row.get(0)?,
                    customers: row.get(1)?,
                })
            })?;
            for row in rows {
                lifecycles.push(row?);
            }
        }

        let mut tiers = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT pyramid_tier_name, COUNT(*), COALESCE(AVG(composite_score), 0)
                 FROM customer_segments
                 WHERE pyramid_tier IS NOT NULL
                 GROUP BY pyramid_tier ORDER BY pyramid_tier",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(TierDistribution {
                    tier: row.get(0)?,
                    customers: row.get(1)?,
                    avg_composite: row.get(2)?,
                })
            })?;
            for row in rows {
                tiers.push(row?);
            }
        }

        let (dormant_salvageable, dormant_transient): (i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(dormant_segment = 'salvageable'), 0),
                COALESCE(SUM(dormant_segment = 'transient'), 0)
             FROM customer_segments",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let last_run_at: Option<String> = conn.query_row(
            "SELECT MAX(finished_at) FROM run_log WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;

        Ok(PopulationOverview {
            customers,
            features: CheckCounts {
                total: customers,
                covered: with_features,
            },
            lifecycles,
            tiers,
            dormant_salvageable,
            dormant_transient,
            last_run_at,
        })
    }

    /// Latest run_log entries, newest first
    pub fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<RunLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT stage, status, started_at, finished_at, processed, skipped, error
             FROM run_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(RunLogEntry {
                stage: row.get(0)?,
                status: row.get(1)?,
                started_at: row.get(2)?,
                finished_at: row.get(3)?,
                processed: row.get(4)?,
                skipped: row.get(5)?,
                error: row.get(6)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

/// One run_log row, as shown by the status command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub stage: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub processed: i64,
    pub skipped: i64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::path::PathBuf;

    fn temp_db(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("segmentry-{name}-{}.db", std::process::id()))
    }

    fn cleanup(path: &PathBuf) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }

    #[test]
    fn opens_against_a_fresh_database() {
        let path = temp_db("report-open");
        cleanup(&path);
        // Write side creates and migrates the database
        let _store = Store::open(&path).unwrap();

        // The pool health check must succeed against a valid database
        let query = ReportQuery::new(&path).unwrap();
        let overview = query.population_overview().unwrap();
        assert_eq!(overview.customers, 0);
        assert!(overview.last_run_at.is_none());
        assert!(query.recent_runs(5).unwrap().is_empty());

        // Pooled connections must work wherever a plain connection does
        let conn = query.conn().unwrap();
        let report = crate::engine::validation::run_checks(&conn).unwrap();
        assert_eq!(report.overall_status, crate::model::CheckStatus::Pass);

        cleanup(&path);
    }
}
