//! The workflow execution engine.
//!
//! A deterministic state machine driving one run: it sequences the
//! pipeline stages, applies the router's verdict after validation,
//! enforces the iteration and budget ceilings, and writes a checkpoint
//! after every stage boundary so an interrupted run can resume where it
//! left off.
//!
//! Stages execute strictly sequentially; the engine owns the run record
//! and hands it to one stage at a time. Stage errors never escape the
//! invocation wrapper; they are classified and turned into transitions
//! (fatal errors abort, escalation errors go to human review). The
//! refinement loop (Decompose ⇄ Validate) is an explicit cycle in the
//! transition table, bounded by the router's iteration-ceiling rule.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use reqflow_sdk::{ProgressSnapshot, StageEvent};

use crate::config::{ModelRates, RunConfig};
use crate::error::{ErrorClass, StageError};
use crate::llm::StageClient;
use crate::metrics;
use crate::parser::DocumentParser;
use crate::record::{ReviewDecision, RunRecord};
use crate::report;
use crate::review::{ReviewGate, ReviewPhase};
use crate::router::{self, Verdict};
use crate::stages::{self, StageContext, ENGINE, HUMAN_REVIEW, PRE_REVIEW};
use crate::store::{CostRow, Database, QualityRow};

/// Engine states. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Extract,
    Analyze,
    PreReview,
    Decompose,
    Validate,
    HumanReview,
    Document,
    Done,
    Aborted,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Extract => "extract",
            EngineState::Analyze => "analyze",
            EngineState::PreReview => "pre_review",
            EngineState::Decompose => "decompose",
            EngineState::Validate => "validate",
            EngineState::HumanReview => "human_review",
            EngineState::Document => "document",
            EngineState::Done => "done",
            EngineState::Aborted => "aborted",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name {
            "extract" => EngineState::Extract,
            "analyze" => EngineState::Analyze,
            "pre_review" => EngineState::PreReview,
            "decompose" => EngineState::Decompose,
            "validate" => EngineState::Validate,
            "human_review" => EngineState::HumanReview,
            "document" => EngineState::Document,
            "done" => EngineState::Done,
            "aborted" => EngineState::Aborted,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Done | EngineState::Aborted)
    }
}

/// Terminal result of a run: the final record plus the terminal state,
/// so callers can tell a completed run from an aborted one.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub state: EngineState,
}

impl RunOutcome {
    pub fn aborted(&self) -> bool {
        self.state == EngineState::Aborted
    }
}

/// Drives one run at a time against an injected set of collaborators.
pub struct Engine {
    config: RunConfig,
    rates: ModelRates,
    store: Database,
    client: Arc<dyn StageClient>,
    parser: Arc<dyn DocumentParser>,
    gate: Arc<dyn ReviewGate>,
}

impl Engine {
    pub fn new(
        config: RunConfig,
        rates: ModelRates,
        store: Database,
        client: Arc<dyn StageClient>,
        parser: Arc<dyn DocumentParser>,
        gate: Arc<dyn ReviewGate>,
    ) -> Result<Self> {
        store.initialize_schema()?;
        Ok(Self {
            config,
            rates,
            store,
            client,
            parser,
            gate,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute a fresh run to a terminal state. The returned record is
    /// final for both completed and aborted runs.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let record = RunRecord::new(&self.config);
        self.drive(record, EngineState::Extract, 0).await
    }

    /// Resume an interrupted run from its latest checkpoint. The
    /// persisted configuration replaces the engine's, so the run keeps
    /// the thresholds it started with.
    pub async fn resume(&mut self, run_id: Uuid) -> Result<RunOutcome> {
        let checkpoint = self
            .store
            .latest_checkpoint(&run_id)?
            .ok_or_else(|| anyhow!("no checkpoint found for run {}", run_id))?;

        let record = RunRecord::from_checkpoint_json(&checkpoint.record)
            .context("corrupt checkpoint record")?;
        self.config =
            serde_json::from_str(&checkpoint.config).context("corrupt checkpoint config")?;
        let state = EngineState::from_name(&checkpoint.state).ok_or_else(|| {
            anyhow!("unknown engine state '{}' in checkpoint", checkpoint.state)
        })?;

        if state.is_terminal() {
            return Ok(RunOutcome { record, state });
        }
        self.drive(record, state, checkpoint.seq + 1).await
    }

    async fn drive(
        &mut self,
        mut record: RunRecord,
        mut state: EngineState,
        mut seq: i64,
    ) -> Result<RunOutcome> {
        let mut budget_warned = record
            .error_log
            .iter()
            .any(|entry| entry.class == ErrorClass::Warning);

        while !state.is_terminal() {
            // Budget guard runs before every stage, whatever the stage is.
            if record.total_cost >= self.config.max_budget {
                let err = StageError::BudgetExceeded {
                    spent: record.total_cost,
                    limit: self.config.max_budget,
                };
                record.push_error(ENGINE, err.class(), err.to_string());
                state = EngineState::Aborted;
                if self.write_checkpoint(&mut record, state, seq) {
                    seq += 1;
                }
                continue;
            }
            if record.total_cost >= self.config.warning_budget && !budget_warned {
                record.push_warning(
                    ENGINE,
                    format!(
                        "cost ${:.4} crossed warning budget ${:.2}",
                        record.total_cost, self.config.warning_budget
                    ),
                );
                StageEvent::BudgetWarning {
                    spent: record.total_cost,
                    limit: self.config.warning_budget,
                }
                .emit();
                budget_warned = true;
            }

            state = match state {
                EngineState::PreReview => {
                    self.run_review(&mut record, ReviewPhase::PreDecomposition)
                        .await
                }
                EngineState::HumanReview => {
                    self.run_review(&mut record, ReviewPhase::Escalation).await
                }
                pipeline => self.run_pipeline_stage(&mut record, pipeline).await,
            };

            if self.write_checkpoint(&mut record, state, seq) {
                seq += 1;
            } else if !state.is_terminal() {
                // A run whose state cannot be persisted must not continue.
                state = EngineState::Aborted;
                if self.write_checkpoint(&mut record, state, seq) {
                    seq += 1;
                }
            }
        }

        self.finalize(&record, state, seq - 1).await?;
        Ok(RunOutcome { record, state })
    }

    /// Invoke one pipeline stage under its timeout and return the next
    /// state. The record only advances when the stage succeeds; on error
    /// or timeout the pre-stage record is kept and annotated.
    async fn run_pipeline_stage(
        &self,
        record: &mut RunRecord,
        state: EngineState,
    ) -> EngineState {
        let name = state.name();
        StageEvent::StageStarted {
            stage: name.to_string(),
            iteration: record.iteration_count,
        }
        .emit();

        let ctx = StageContext {
            client: self.client.as_ref(),
            parser: self.parser.as_ref(),
            config: &self.config,
            rates: &self.rates,
        };
        let limit = self.config.stage_timeouts.for_stage(name);
        let input = record.clone();
        let started = Instant::now();

        let outcome = tokio::time::timeout(limit, async {
            match state {
                EngineState::Extract => stages::extract::run(input, &ctx).await,
                EngineState::Analyze => stages::analyze::run(input, &ctx).await,
                EngineState::Decompose => stages::decompose::run(input, &ctx).await,
                EngineState::Validate => stages::validate::run(input, &ctx).await,
                EngineState::Document => stages::document::run(input, &ctx).await,
                other => Err(StageError::Internal(format!(
                    "'{}' is not a pipeline stage",
                    other.name()
                ))),
            }
        })
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        let next = match outcome {
            Ok(Ok(updated)) => {
                *record = updated;
                StageEvent::StageCompleted {
                    stage: name.to_string(),
                    duration_secs: elapsed,
                }
                .emit();
                self.success_transition(state, record)
            }
            Ok(Err(err)) => {
                record.push_error(name, err.class(), err.to_string());
                StageEvent::StageFailed {
                    stage: name.to_string(),
                    error: err.to_string(),
                }
                .emit();
                match err.class() {
                    ErrorClass::Fatal => EngineState::Aborted,
                    _ => {
                        record.requires_human_review = true;
                        EngineState::HumanReview
                    }
                }
            }
            Err(_elapsed) => {
                let err = StageError::Timeout {
                    stage: name.to_string(),
                    seconds: limit.as_secs(),
                };
                record.push_error(name, err.class(), err.to_string());
                StageEvent::StageFailed {
                    stage: name.to_string(),
                    error: err.to_string(),
                }
                .emit();
                record.requires_human_review = true;
                EngineState::HumanReview
            }
        };

        metrics::record_timing(record, name, elapsed);
        StageEvent::Snapshot {
            snapshot: ProgressSnapshot {
                stage_name: name.to_string(),
                duration_secs: elapsed,
                key_counts: record.key_counts(),
                cost_so_far: record.total_cost,
                energy_so_far_wh: record.total_energy_wh,
            },
        }
        .emit();
        next
    }

    fn success_transition(&self, state: EngineState, record: &mut RunRecord) -> EngineState {
        match state {
            EngineState::Extract => EngineState::Analyze,
            EngineState::Analyze => {
                if self.config.pre_review {
                    EngineState::PreReview
                } else {
                    EngineState::Decompose
                }
            }
            EngineState::Decompose => EngineState::Validate,
            EngineState::Validate => {
                let verdict = router::route(record);
                StageEvent::RouteDecided {
                    verdict: verdict.as_str().to_string(),
                }
                .emit();
                match verdict {
                    Verdict::Pass => EngineState::Document,
                    Verdict::Revise => EngineState::Decompose,
                    Verdict::HumanReview => {
                        record.requires_human_review = true;
                        EngineState::HumanReview
                    }
                }
            }
            EngineState::Document => EngineState::Done,
            // Review and terminal states never reach this path.
            other => {
                record.push_error(
                    ENGINE,
                    ErrorClass::Fatal,
                    format!("no success transition from '{}'", other.name()),
                );
                EngineState::Aborted
            }
        }
    }

    /// Block on the review gate and map the decision to the next state.
    /// A gate that cannot run aborts the run.
    async fn run_review(&self, record: &mut RunRecord, phase: ReviewPhase) -> EngineState {
        let name = match phase {
            ReviewPhase::PreDecomposition => PRE_REVIEW,
            ReviewPhase::Escalation => HUMAN_REVIEW,
        };
        StageEvent::ReviewRequested {
            phase: phase.as_str().to_string(),
        }
        .emit();

        let started = Instant::now();
        let result = self.gate.review(record, phase).await;
        metrics::record_timing(record, name, started.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                if phase == ReviewPhase::Escalation {
                    record.human_review_decision = Some(outcome.decision);
                }
                match outcome.decision {
                    ReviewDecision::Approve => match phase {
                        ReviewPhase::PreDecomposition => EngineState::Decompose,
                        ReviewPhase::Escalation => EngineState::Document,
                    },
                    ReviewDecision::Revise => {
                        if phase == ReviewPhase::Escalation {
                            record.clear_cycle_errors();
                        }
                        if let Some(notes) = outcome.notes {
                            merge_feedback(record, &notes);
                        }
                        EngineState::Decompose
                    }
                    ReviewDecision::Abort => EngineState::Aborted,
                }
            }
            Err(err) => {
                record.push_error(name, err.class(), err.to_string());
                EngineState::Aborted
            }
        }
    }

    /// Persist a snapshot keyed by the run id and the next state to
    /// execute. Returns false when the snapshot could not be written; the
    /// failure is recorded on the run.
    fn write_checkpoint(&self, record: &mut RunRecord, state: EngineState, seq: i64) -> bool {
        let record_json = match record.to_checkpoint_json() {
            Ok(json) => json,
            Err(e) => {
                record.push_error(ENGINE, ErrorClass::Fatal, format!("checkpoint: {}", e));
                return false;
            }
        };
        let config_json = match serde_json::to_string(&self.config) {
            Ok(json) => json,
            Err(e) => {
                record.push_error(ENGINE, ErrorClass::Fatal, format!("checkpoint: {}", e));
                return false;
            }
        };
        if let Err(e) =
            self.store
                .insert_checkpoint(&record.run_id, seq, state.name(), &record_json, &config_json)
        {
            record.push_error(ENGINE, ErrorClass::Fatal, format!("checkpoint: {}", e));
            return false;
        }
        true
    }

    /// Write the final history rows and, for aborted runs, the abort
    /// report. Runs in every terminal path so no run disappears silently.
    async fn finalize(
        &self,
        record: &RunRecord,
        state: EngineState,
        last_seq: i64,
    ) -> Result<()> {
        let now = Local::now();
        self.store.insert_cost_row(&CostRow {
            run_id: record.run_id,
            timestamp: now,
            subsystem: record.target_subsystem.clone(),
            total_cost: record.total_cost,
            breakdown: serde_json::to_string(&record.cost_breakdown)?,
            cost_source: "token_rates".to_string(),
        })?;

        let metrics = record.quality_metrics.as_ref();
        self.store.insert_quality_row(&QualityRow {
            run_id: record.run_id,
            timestamp: now,
            subsystem: record.target_subsystem.clone(),
            completeness: metrics.map(|m| m.completeness).unwrap_or(0.0),
            clarity: metrics.map(|m| m.clarity).unwrap_or(0.0),
            testability: metrics.map(|m| m.testability).unwrap_or(0.0),
            traceability: metrics.map(|m| m.traceability).unwrap_or(0.0),
            overall: metrics.map(|m| m.overall).unwrap_or(0.0),
            validation_passed: record.validation_passed,
            iteration_count: record.iteration_count,
            requirement_count: record.decomposed_requirements.len(),
        })?;

        if state == EngineState::Aborted {
            let reason = record
                .errors
                .last()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "aborted by reviewer".to_string());

            let content = report::abort_report(record, last_seq);
            let dir = &self.config.output_dir;
            let path = dir.join(format!("{}_abort.md", record.run_id));
            let written = tokio::fs::create_dir_all(dir).await.is_ok()
                && tokio::fs::write(&path, content).await.is_ok();
            if written {
                reqflow_sdk::log_file_saved!(path.display());
            } else {
                reqflow_sdk::log_warning!("could not write abort report to {}", path.display());
            }

            StageEvent::RunAborted {
                run_id: record.run_id,
                reason,
            }
            .emit();
        } else {
            StageEvent::RunCompleted {
                run_id: record.run_id,
                total_cost: record.total_cost,
                total_energy_wh: record.total_energy_wh,
            }
            .emit();
        }
        Ok(())
    }
}

fn merge_feedback(record: &mut RunRecord, notes: &str) {
    record.refinement_feedback = Some(match record.refinement_feedback.take() {
        Some(existing) => format!("{}\n\nReviewer guidance: {}", existing, notes),
        None => format!("Reviewer guidance: {}", notes),
    });
}
