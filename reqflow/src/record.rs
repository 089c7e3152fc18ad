//! The run record: all mutable state for one decomposition run.
//!
//! A single `RunRecord` is created when a run starts and threaded through
//! every stage. Stages take the record by value and return a merged
//! successor; the engine owns the record exclusively for the lifetime of
//! the run, so no locking is involved. The record is fully serializable;
//! its JSON form is the checkpoint format and the payload of the final
//! history rows.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::ErrorClass;

/// Classification of a source requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Functional,
    Performance,
    Interface,
    Safety,
    Constraint,
    #[serde(other)]
    Other,
}

impl Default for RequirementKind {
    fn default() -> Self {
        RequirementKind::Functional
    }
}

/// A single system-level requirement extracted from the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub kind: RequirementKind,
    /// Where in the source document this came from (e.g. "line 42").
    #[serde(default)]
    pub source_location: Option<String>,
}

/// Allocation rules produced by the Analyze stage and consumed by Decompose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionStrategy {
    /// Short prose description of the allocation approach.
    pub approach: String,
    /// Rules deciding which source requirements belong to the target
    /// subsystem and how they should be refined.
    pub allocation_rules: Vec<String>,
    /// Source requirement ids the strategy considers candidates for the
    /// target subsystem. May be empty when nothing applies.
    #[serde(default)]
    pub candidate_requirement_ids: Vec<String>,
}

/// A subsystem-level requirement produced by the Decompose stage.
///
/// `parent_ids` is the traceability relation back to the source
/// requirements; it is non-empty unless the entry is a system-level
/// fallback with no single parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemRequirement {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// How the quality metrics were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    /// Normal scoring over a non-empty allocation.
    Standard,
    /// No source requirement mapped to the target subsystem; scoring was
    /// bypassed and the run is valid by definition.
    NoRequirementsAllocated,
}

/// Four-dimensional quality score for a decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub completeness: f64,
    pub clarity: f64,
    pub testability: f64,
    pub traceability: f64,
    pub overall: f64,
    pub validation_type: ValidationType,
}

impl QualityMetrics {
    /// Metrics for the zero-allocation special case: perfect across all
    /// dimensions, tagged so reports can tell the two apart.
    pub fn no_requirements_allocated() -> Self {
        Self {
            completeness: 1.0,
            clarity: 1.0,
            testability: 1.0,
            traceability: 1.0,
            overall: 1.0,
            validation_type: ValidationType::NoRequirementsAllocated,
        }
    }
}

/// Severity of a validation issue. Ordering is most-severe-first so a
/// plain sort puts critical issues at the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Major => write!(f, "major"),
            Severity::Minor => write!(f, "minor"),
        }
    }
}

/// One problem found by the Validate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub requirement_id: String,
    pub severity: Severity,
    pub description: String,
}

/// Structured error entry for `errors` and `error_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: String,
    pub class: ErrorClass,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Decision returned by a human review gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Revise,
    Abort,
}

/// Complete mutable state for one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub spec_path: PathBuf,
    pub target_subsystem: String,

    pub extracted_requirements: Vec<Requirement>,
    pub decomposition_strategy: Option<DecompositionStrategy>,
    pub decomposed_requirements: Vec<SubsystemRequirement>,

    pub quality_metrics: Option<QualityMetrics>,
    pub validation_passed: bool,
    pub validation_issues: Vec<ValidationIssue>,
    pub refinement_feedback: Option<String>,

    pub iteration_count: u32,
    pub max_iterations: u32,

    /// Fatal/current-cycle errors. The router escalates whenever this is
    /// non-empty; cleared when a human review sends the run back around.
    pub errors: Vec<ErrorRecord>,
    /// Append-only history of every error and warning across the run.
    pub error_log: Vec<ErrorRecord>,

    pub requires_human_review: bool,
    pub human_review_decision: Option<ReviewDecision>,

    pub cost_breakdown: BTreeMap<String, f64>,
    pub timing_breakdown: BTreeMap<String, f64>,
    pub energy_breakdown: BTreeMap<String, f64>,
    pub total_cost: f64,
    pub total_energy_wh: f64,

    pub created_at: DateTime<Local>,
}

impl RunRecord {
    /// Create a fresh record from the run configuration. Accumulators are
    /// zeroed, sequences empty, and a new run id assigned.
    pub fn new(config: &RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            spec_path: config.spec_path.clone(),
            target_subsystem: config.target_subsystem.clone(),
            extracted_requirements: Vec::new(),
            decomposition_strategy: None,
            decomposed_requirements: Vec::new(),
            quality_metrics: None,
            validation_passed: false,
            validation_issues: Vec::new(),
            refinement_feedback: None,
            iteration_count: 0,
            max_iterations: config.max_iterations,
            errors: Vec::new(),
            error_log: Vec::new(),
            requires_human_review: false,
            human_review_decision: None,
            cost_breakdown: BTreeMap::new(),
            timing_breakdown: BTreeMap::new(),
            energy_breakdown: BTreeMap::new(),
            total_cost: 0.0,
            total_energy_wh: 0.0,
            created_at: Local::now(),
        }
    }

    /// Append an error to both the current-cycle list and the run history.
    pub fn push_error(&mut self, stage: &str, class: ErrorClass, message: impl Into<String>) {
        let entry = ErrorRecord {
            stage: stage.to_string(),
            class,
            message: message.into(),
            timestamp: Local::now(),
        };
        self.errors.push(entry.clone());
        self.error_log.push(entry);
    }

    /// Append a non-fatal warning to the run history only.
    pub fn push_warning(&mut self, stage: &str, message: impl Into<String>) {
        self.error_log.push(ErrorRecord {
            stage: stage.to_string(),
            class: ErrorClass::Warning,
            message: message.into(),
            timestamp: Local::now(),
        });
    }

    /// Clear the current-cycle errors after a human review sends the run
    /// back to decomposition. The history in `error_log` is untouched.
    pub fn clear_cycle_errors(&mut self) {
        self.errors.clear();
    }

    /// Counts shown to the presentation layer after each stage.
    pub fn key_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        counts.insert("extracted".to_string(), self.extracted_requirements.len());
        counts.insert("decomposed".to_string(), self.decomposed_requirements.len());
        counts.insert("issues".to_string(), self.validation_issues.len());
        counts
    }

    /// Serialize to the checkpoint JSON format.
    pub fn to_checkpoint_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restore from checkpoint JSON.
    pub fn from_checkpoint_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
