//! Shared presentation contract for reqflow consumers.
//!
//! The engine runs headless; everything a TUI, dashboard, or log collector
//! needs to render progress is emitted as structured events on stderr, one
//! JSON object per line behind a fixed prefix. Consumers strip the prefix
//! and deserialize; raw stderr lines without the prefix are plain program
//! output and can be displayed verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Read-only per-stage snapshot handed to the presentation layer after
/// every stage boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage_name: String,
    pub duration_secs: f64,
    /// Counts a consumer may want to display (extracted requirements,
    /// decomposed requirements, open issues).
    pub key_counts: BTreeMap<String, usize>,
    pub cost_so_far: f64,
    pub energy_so_far_wh: f64,
}

/// Structured events emitted by a run for machine consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    /// A stage began executing. `iteration` is the refinement iteration the
    /// run is currently in (0 before the first failed validation).
    StageStarted {
        stage: String,
        iteration: u32,
    },
    /// A stage finished successfully.
    StageCompleted {
        stage: String,
        duration_secs: f64,
    },
    /// A stage failed; the engine decides where the run goes next.
    StageFailed {
        stage: String,
        error: String,
    },
    /// The post-validation router picked the next stage.
    RouteDecided {
        verdict: String,
    },
    /// Accumulated cost crossed the warning budget.
    BudgetWarning {
        spent: f64,
        limit: f64,
    },
    /// The run is waiting on a human review gate.
    ReviewRequested {
        phase: String,
    },
    /// Per-stage progress snapshot for display.
    Snapshot {
        snapshot: ProgressSnapshot,
    },
    /// Terminal: the run completed and reports were written.
    RunCompleted {
        run_id: Uuid,
        total_cost: f64,
        total_energy_wh: f64,
    },
    /// Terminal: the run aborted.
    RunAborted {
        run_id: Uuid,
        reason: String,
    },
}

/// Prefix identifying structured event lines on stderr.
pub const EVENT_PREFIX: &str = "__RF_EVENT__:";

impl StageEvent {
    /// Emit this event to stderr for machine consumers.
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("{}{}", EVENT_PREFIX, json);
            // Force flush stderr in async contexts
            let _ = std::io::stderr().flush();
        }
    }

    /// Parse a stderr line back into an event, if it carries the prefix.
    pub fn parse_line(line: &str) -> Option<Self> {
        let json = line.strip_prefix(EVENT_PREFIX)?;
        serde_json::from_str(json).ok()
    }
}

/// Logs the start of a pipeline stage with a header.
#[macro_export]
macro_rules! log_stage_start {
    ($stage:expr, $description:expr) => {
        println!("\x1b[1;36m═══ STAGE: {} ═══\x1b[0m", $stage);
        println!("\x1b[36m{}\x1b[0m", $description);
    };
}

/// Logs the completion of a pipeline stage.
#[macro_export]
macro_rules! log_stage_complete {
    ($stage:expr) => {
        println!("\x1b[32m✓ {} complete\x1b[0m", $stage);
    };
}

/// Logs a stage failure.
#[macro_export]
macro_rules! log_stage_failed {
    ($stage:expr, $error:expr) => {
        println!("\x1b[31m✗ {} failed: {}\x1b[0m", $stage, $error);
    };
}

/// Logs an informational message.
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs per-run cost statistics.
#[macro_export]
macro_rules! log_run_stats {
    ($duration_secs:expr, $cost_usd:expr, $energy_wh:expr) => {
        println!(
            "\x1b[2mRun statistics: {:.1}s, ${:.4}, {:.2} Wh\x1b[0m",
            $duration_secs, $cost_usd, $energy_wh
        );
    };
}

/// Logs that a report file has been written.
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}
