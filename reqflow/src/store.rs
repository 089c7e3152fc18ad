//! SQLite persistence for checkpoints and run history.
//!
//! Three concerns share one database file:
//!
//! 1. **checkpoints**: full run-record snapshots keyed by (run_id, seq),
//!    written after every stage boundary; the latest row is the resume
//!    point for an interrupted run.
//! 2. **cost_history**: one row per completed or aborted run with the
//!    total cost and per-stage breakdown.
//! 3. **quality_history**: one row per run with the four dimension
//!    scores, gate outcome, and iteration count.
//!
//! The history tables are append-only and feed the trend queries behind
//! `reqflow history` and `reqflow stats`. Every write is a single
//! transactional insert scoped to its own run id, so concurrent runs
//! sharing a store cannot corrupt each other's rows. WAL mode is enabled
//! for concurrent readers.

use anyhow::Result;
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use uuid::Uuid;

/// Database wrapper for run persistence.
pub struct Database {
    conn: Connection,
}

/// One persisted run-record snapshot.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub seq: i64,
    /// Engine state to execute next when resuming from this snapshot.
    pub state: String,
    /// Run record serialized as JSON.
    pub record: String,
    /// Run configuration serialized as JSON, so a resumed run keeps the
    /// thresholds it started with.
    pub config: String,
    pub created_at: DateTime<Local>,
}

/// One row of the cost-history store.
#[derive(Debug, Clone)]
pub struct CostRow {
    pub run_id: Uuid,
    pub timestamp: DateTime<Local>,
    pub subsystem: String,
    pub total_cost: f64,
    /// Per-stage breakdown serialized as JSON.
    pub breakdown: String,
    pub cost_source: String,
}

/// One row of the quality-history store.
#[derive(Debug, Clone)]
pub struct QualityRow {
    pub run_id: Uuid,
    pub timestamp: DateTime<Local>,
    pub subsystem: String,
    pub completeness: f64,
    pub clarity: f64,
    pub testability: f64,
    pub traceability: f64,
    pub overall: f64,
    pub validation_passed: bool,
    pub iteration_count: u32,
    pub requirement_count: usize,
}

/// Joined cost/quality summary for listing past runs.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub timestamp: DateTime<Local>,
    pub subsystem: String,
    pub total_cost: f64,
    pub overall: f64,
    pub validation_passed: bool,
    pub iteration_count: u32,
    pub requirement_count: usize,
}

/// Aggregates for one subsystem across its runs.
#[derive(Debug, Clone)]
pub struct SubsystemStats {
    pub runs: usize,
    pub avg_cost: f64,
    pub avg_overall: f64,
    pub pass_rate: f64,
    pub avg_iterations: f64,
}

impl Database {
    /// Open (or create) a database at the given path.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// Create an in-memory database, for tests and dry-runs.
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// Create all tables and indexes.
    pub fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL,

                PRIMARY KEY (run_id, seq)
            );

            CREATE TABLE IF NOT EXISTS cost_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                subsystem TEXT NOT NULL,
                total_cost REAL NOT NULL,
                breakdown TEXT NOT NULL,
                cost_source TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cost_history_run ON cost_history(run_id);
            CREATE INDEX IF NOT EXISTS idx_cost_history_time ON cost_history(timestamp DESC);

            CREATE TABLE IF NOT EXISTS quality_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                subsystem TEXT NOT NULL,
                completeness REAL NOT NULL,
                clarity REAL NOT NULL,
                testability REAL NOT NULL,
                traceability REAL NOT NULL,
                overall REAL NOT NULL,
                validation_passed INTEGER NOT NULL,
                iteration_count INTEGER NOT NULL,
                requirement_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quality_history_run ON quality_history(run_id);
            CREATE INDEX IF NOT EXISTS idx_quality_history_subsystem ON quality_history(subsystem);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
            [],
        )?;
        Ok(())
    }

    /// Get current schema version.
    pub fn get_schema_version(&self) -> Result<i32> {
        let version: i32 =
            self.conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?;
        Ok(version)
    }

    // -- checkpoints --------------------------------------------------------

    /// Persist one run-record snapshot.
    pub fn insert_checkpoint(
        &self,
        run_id: &Uuid,
        seq: i64,
        state: &str,
        record_json: &str,
        config_json: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO checkpoints (run_id, seq, state, record, config, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                run_id.to_string(),
                seq,
                state,
                record_json,
                config_json,
                Local::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent snapshot for a run, if any.
    pub fn latest_checkpoint(&self, run_id: &Uuid) -> Result<Option<Checkpoint>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT run_id, seq, state, record, config, created_at
                FROM checkpoints
                WHERE run_id = ?1
                ORDER BY seq DESC
                LIMIT 1
                "#,
                params![run_id.to_string()],
                map_checkpoint_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Fetch one snapshot by sequence number, for audit and replay.
    pub fn checkpoint_at(&self, run_id: &Uuid, seq: i64) -> Result<Option<Checkpoint>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT run_id, seq, state, record, config, created_at
                FROM checkpoints
                WHERE run_id = ?1 AND seq = ?2
                "#,
                params![run_id.to_string(), seq],
                map_checkpoint_row,
            )
            .optional()?;
        Ok(result)
    }

    /// Highest checkpoint sequence written for a run, if any.
    pub fn latest_seq(&self, run_id: &Uuid) -> Result<Option<i64>> {
        let seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM checkpoints WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Number of snapshots written for a run.
    pub fn checkpoint_count(&self, run_id: &Uuid) -> Result<usize> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE run_id = ?1",
            params![run_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- history ------------------------------------------------------------

    /// Append a run's final cost row.
    pub fn insert_cost_row(&self, row: &CostRow) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO cost_history (run_id, timestamp, subsystem, total_cost, breakdown, cost_source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                row.run_id.to_string(),
                row.timestamp.to_rfc3339(),
                row.subsystem,
                row.total_cost,
                row.breakdown,
                row.cost_source,
            ],
        )?;
        Ok(())
    }

    /// Append a run's final quality row.
    pub fn insert_quality_row(&self, row: &QualityRow) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO quality_history (
                run_id, timestamp, subsystem,
                completeness, clarity, testability, traceability, overall,
                validation_passed, iteration_count, requirement_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                row.run_id.to_string(),
                row.timestamp.to_rfc3339(),
                row.subsystem,
                row.completeness,
                row.clarity,
                row.testability,
                row.traceability,
                row.overall,
                row.validation_passed as i32,
                row.iteration_count,
                row.requirement_count,
            ],
        )?;
        Ok(())
    }

    /// List past runs, newest first, optionally filtered by subsystem.
    pub fn list_runs(
        &self,
        limit: usize,
        offset: usize,
        subsystem: Option<&str>,
    ) -> Result<Vec<RunSummary>> {
        let base = r#"
            SELECT q.run_id, q.timestamp, q.subsystem,
                   COALESCE(c.total_cost, 0.0),
                   q.overall, q.validation_passed, q.iteration_count, q.requirement_count
            FROM quality_history q
            LEFT JOIN cost_history c ON c.run_id = q.run_id
        "#;

        let runs = if let Some(subsystem) = subsystem {
            let query = format!(
                "{} WHERE q.subsystem = ?1 ORDER BY q.timestamp DESC LIMIT ?2 OFFSET ?3",
                base
            );
            let mut stmt = self.conn.prepare(&query)?;
            stmt.query_map(params![subsystem, limit, offset], map_summary_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let query = format!("{} ORDER BY q.timestamp DESC LIMIT ?1 OFFSET ?2", base);
            let mut stmt = self.conn.prepare(&query)?;
            stmt.query_map(params![limit, offset], map_summary_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(runs)
    }

    /// Average total cost across runs, optionally per subsystem. `None`
    /// when no history exists.
    pub fn average_cost(&self, subsystem: Option<&str>) -> Result<Option<f64>> {
        let avg: Option<f64> = if let Some(subsystem) = subsystem {
            self.conn.query_row(
                r#"
                SELECT AVG(c.total_cost)
                FROM cost_history c
                JOIN quality_history q ON q.run_id = c.run_id
                WHERE q.subsystem = ?1
                "#,
                params![subsystem],
                |row| row.get(0),
            )?
        } else {
            self.conn
                .query_row("SELECT AVG(total_cost) FROM cost_history", [], |row| {
                    row.get(0)
                })?
        };
        Ok(avg)
    }

    /// Fraction of runs whose validation passed. `None` without history.
    pub fn pass_rate(&self, subsystem: Option<&str>) -> Result<Option<f64>> {
        let rate: Option<f64> = if let Some(subsystem) = subsystem {
            self.conn.query_row(
                "SELECT AVG(validation_passed) FROM quality_history WHERE subsystem = ?1",
                params![subsystem],
                |row| row.get(0),
            )?
        } else {
            self.conn.query_row(
                "SELECT AVG(validation_passed) FROM quality_history",
                [],
                |row| row.get(0),
            )?
        };
        Ok(rate)
    }

    /// Aggregate history for one subsystem.
    pub fn subsystem_stats(&self, subsystem: &str) -> Result<Option<SubsystemStats>> {
        let stats = self
            .conn
            .query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(AVG(c.total_cost), 0.0),
                       AVG(q.overall),
                       AVG(q.validation_passed),
                       AVG(q.iteration_count)
                FROM quality_history q
                LEFT JOIN cost_history c ON c.run_id = q.run_id
                WHERE q.subsystem = ?1
                "#,
                params![subsystem],
                |row| {
                    let runs: usize = row.get(0)?;
                    Ok((
                        runs,
                        row.get::<_, f64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                    ))
                },
            )
            .optional()?;

        Ok(stats.and_then(|(runs, avg_cost, overall, pass, iterations)| {
            if runs == 0 {
                return None;
            }
            Some(SubsystemStats {
                runs,
                avg_cost,
                avg_overall: overall.unwrap_or(0.0),
                pass_rate: pass.unwrap_or(0.0),
                avg_iterations: iterations.unwrap_or(0.0),
            })
        }))
    }

    /// Delete checkpoints and history rows older than the cutoff.
    /// Returns the number of runs removed from history.
    pub fn delete_runs_before(&self, cutoff: DateTime<Local>) -> Result<usize> {
        let cutoff_str = cutoff.to_rfc3339();
        self.conn.execute(
            "DELETE FROM checkpoints WHERE created_at < ?1",
            params![cutoff_str],
        )?;
        self.conn.execute(
            "DELETE FROM cost_history WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        let deleted = self.conn.execute(
            "DELETE FROM quality_history WHERE timestamp < ?1",
            params![cutoff_str],
        )?;
        Ok(deleted)
    }
}

fn parse_rfc3339(value: &str, column: usize) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_uuid(value: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_checkpoint_row(row: &Row) -> rusqlite::Result<Checkpoint> {
    let run_id_str: String = row.get(0)?;
    let created_at_str: String = row.get(5)?;
    Ok(Checkpoint {
        run_id: parse_uuid(&run_id_str, 0)?,
        seq: row.get(1)?,
        state: row.get(2)?,
        record: row.get(3)?,
        config: row.get(4)?,
        created_at: parse_rfc3339(&created_at_str, 5)?,
    })
}

fn map_summary_row(row: &Row) -> rusqlite::Result<RunSummary> {
    let run_id_str: String = row.get(0)?;
    let timestamp_str: String = row.get(1)?;
    let passed: i32 = row.get(5)?;
    Ok(RunSummary {
        run_id: parse_uuid(&run_id_str, 0)?,
        timestamp: parse_rfc3339(&timestamp_str, 1)?,
        subsystem: row.get(2)?,
        total_cost: row.get(3)?,
        overall: row.get(4)?,
        validation_passed: passed != 0,
        iteration_count: row.get(6)?,
        requirement_count: row.get(7)?,
    })
}
