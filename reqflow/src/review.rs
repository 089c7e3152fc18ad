//! Human review gate.
//!
//! Review is modeled as a blocking external call returning approve,
//! revise, or abort. Interactive deployments use [`ConsoleGate`];
//! non-interactive ones substitute an [`AutoPolicy`] behind the same
//! interface.

use async_trait::async_trait;
use std::io::{BufRead, Write};

use crate::error::StageError;
use crate::record::{ReviewDecision, RunRecord};

/// Why the run is asking for a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewPhase {
    /// Configured checkpoint between Analyze and Decompose.
    PreDecomposition,
    /// Router escalation: errors, iteration ceiling, or budget trouble.
    Escalation,
}

impl ReviewPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewPhase::PreDecomposition => "pre_decomposition",
            ReviewPhase::Escalation => "escalation",
        }
    }
}

/// A reviewer's decision, with optional guidance for the next cycle.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub decision: ReviewDecision,
    pub notes: Option<String>,
}

/// Blocking review seam.
#[async_trait]
pub trait ReviewGate: Send + Sync {
    async fn review(
        &self,
        record: &RunRecord,
        phase: ReviewPhase,
    ) -> Result<ReviewOutcome, StageError>;
}

/// Fixed-decision gate for non-interactive deployments.
pub struct AutoPolicy {
    decision: ReviewDecision,
}

impl AutoPolicy {
    pub fn approve() -> Self {
        Self {
            decision: ReviewDecision::Approve,
        }
    }

    pub fn abort() -> Self {
        Self {
            decision: ReviewDecision::Abort,
        }
    }
}

#[async_trait]
impl ReviewGate for AutoPolicy {
    async fn review(
        &self,
        _record: &RunRecord,
        _phase: ReviewPhase,
    ) -> Result<ReviewOutcome, StageError> {
        Ok(ReviewOutcome {
            decision: self.decision,
            notes: None,
        })
    }
}

/// Interactive gate reading a decision from stdin.
pub struct ConsoleGate;

impl ConsoleGate {
    fn prompt_blocking(summary: String) -> Result<ReviewOutcome, StageError> {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();

        println!("{}", summary);
        loop {
            print!("Decision [a]pprove / [r]evise / a[b]ort: ");
            stdout
                .flush()
                .map_err(|e| StageError::ReviewUnavailable(e.to_string()))?;

            let mut line = String::new();
            let read = stdin
                .lock()
                .read_line(&mut line)
                .map_err(|e| StageError::ReviewUnavailable(e.to_string()))?;
            if read == 0 {
                // stdin closed; the gate cannot run in this deployment
                return Err(StageError::ReviewUnavailable("stdin closed".to_string()));
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "a" | "approve" => {
                    return Ok(ReviewOutcome {
                        decision: ReviewDecision::Approve,
                        notes: None,
                    })
                }
                "r" | "revise" => {
                    print!("Guidance for the next decomposition (optional): ");
                    stdout
                        .flush()
                        .map_err(|e| StageError::ReviewUnavailable(e.to_string()))?;
                    let mut notes = String::new();
                    stdin
                        .lock()
                        .read_line(&mut notes)
                        .map_err(|e| StageError::ReviewUnavailable(e.to_string()))?;
                    let notes = notes.trim();
                    return Ok(ReviewOutcome {
                        decision: ReviewDecision::Revise,
                        notes: if notes.is_empty() {
                            None
                        } else {
                            Some(notes.to_string())
                        },
                    });
                }
                "b" | "abort" => {
                    return Ok(ReviewOutcome {
                        decision: ReviewDecision::Abort,
                        notes: None,
                    })
                }
                other => println!("Unrecognized input: '{}'", other),
            }
        }
    }

    fn summarize(record: &RunRecord, phase: ReviewPhase) -> String {
        let mut summary = format!(
            "\n=== Human review requested ({}) ===\nRun {} targeting subsystem '{}'\n",
            phase.as_str(),
            record.run_id,
            record.target_subsystem
        );
        summary.push_str(&format!(
            "Extracted: {}, decomposed: {}, iteration {}/{}\n",
            record.extracted_requirements.len(),
            record.decomposed_requirements.len(),
            record.iteration_count,
            record.max_iterations
        ));
        if let Some(metrics) = &record.quality_metrics {
            summary.push_str(&format!(
                "Last overall score: {:.2} (passed: {})\n",
                metrics.overall, record.validation_passed
            ));
        }
        for error in &record.errors {
            summary.push_str(&format!("Error [{}] {}: {}\n", error.class, error.stage, error.message));
        }
        summary
    }
}

#[async_trait]
impl ReviewGate for ConsoleGate {
    async fn review(
        &self,
        record: &RunRecord,
        phase: ReviewPhase,
    ) -> Result<ReviewOutcome, StageError> {
        let summary = Self::summarize(record, phase);
        tokio::task::spawn_blocking(move || Self::prompt_blocking(summary))
            .await
            .map_err(|e| StageError::ReviewUnavailable(e.to_string()))?
    }
}
