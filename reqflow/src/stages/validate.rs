//! Validate stage: score the decomposition against the quality gate.
//!
//! The zero-allocation special case comes first: an empty decomposition
//! is a legitimate outcome, scored 1.0 across the board and tagged so
//! reports can explain it, with no model call at all. The normal path
//! asks the client for the four dimension scores, combines them with the
//! configured weight vector, and on a failing gate increments the
//! refinement counter and distills the issues into feedback for the next
//! Decompose call.
//!
//! Scoring errors never escape this stage: they are recorded on the run
//! and surface through the router's fatal-error escalation.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::StageError;
use crate::llm::{invoke_with_retry, ResponseSchema};
use crate::metrics;
use crate::record::{QualityMetrics, RunRecord, ValidationIssue, ValidationType};
use crate::stages::{StageContext, VALIDATE};

#[derive(Debug, Deserialize)]
struct AssessmentPayload {
    scores: DimensionScores,
    issues: Vec<ValidationIssue>,
}

#[derive(Debug, Deserialize)]
struct DimensionScores {
    completeness: f64,
    clarity: f64,
    testability: f64,
    traceability: f64,
}

pub async fn run(
    mut record: RunRecord,
    ctx: &StageContext<'_>,
) -> Result<RunRecord, StageError> {
    // Issues are rebuilt on every validation pass.
    record.validation_issues.clear();

    // Zero-allocation short-circuit, before any scoring logic runs.
    if record.decomposed_requirements.is_empty() {
        record.quality_metrics = Some(QualityMetrics::no_requirements_allocated());
        record.validation_passed = true;
        return Ok(record);
    }

    if let Err(err) = score(&mut record, ctx).await {
        record.validation_passed = false;
        record.push_error(VALIDATE, err.class(), err.to_string());
    }
    Ok(record)
}

async fn score(record: &mut RunRecord, ctx: &StageContext<'_>) -> Result<(), StageError> {
    let sources_json = serde_json::to_string_pretty(&record.extracted_requirements)
        .map_err(|e| StageError::Serialization(e.to_string()))?;
    let decomposed_json = serde_json::to_string_pretty(&record.decomposed_requirements)
        .map_err(|e| StageError::Serialization(e.to_string()))?;
    let strategy_json = match &record.decomposition_strategy {
        Some(strategy) => serde_json::to_string_pretty(strategy)
            .map_err(|e| StageError::Serialization(e.to_string()))?,
        None => "{}".to_string(),
    };
    let prompt = build_prompt(
        &record.target_subsystem,
        &strategy_json,
        &sources_json,
        &decomposed_json,
    );

    let response = invoke_with_retry(ctx.client, &prompt, ResponseSchema::QualityAssessment).await?;

    metrics::record_cost(
        record,
        ctx.rates,
        VALIDATE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );
    metrics::record_energy(
        record,
        ctx.rates,
        VALIDATE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );

    let assessment: AssessmentPayload = serde_json::from_value(response.output)
        .map_err(|e| StageError::MalformedResponse(format!("quality assessment: {}", e)))?;

    let weights = ctx.config.quality_weights;
    let overall = weights.overall(
        assessment.scores.completeness,
        assessment.scores.clarity,
        assessment.scores.testability,
        assessment.scores.traceability,
    );

    record.quality_metrics = Some(QualityMetrics {
        completeness: assessment.scores.completeness,
        clarity: assessment.scores.clarity,
        testability: assessment.scores.testability,
        traceability: assessment.scores.traceability,
        overall,
        validation_type: ValidationType::Standard,
    });
    record.validation_issues = assessment.issues;
    record.validation_passed = overall >= ctx.config.quality_threshold;

    if !record.validation_passed {
        record.iteration_count += 1;
        record.refinement_feedback = Some(summarize_issues(&record.validation_issues, overall));
    }

    Ok(())
}

fn build_prompt(
    target_subsystem: &str,
    strategy_json: &str,
    sources_json: &str,
    decomposed_json: &str,
) -> String {
    format!(
        r#"Assess the quality of this requirements decomposition.

Return JSON: {{"scores": {{"completeness", "clarity", "testability", "traceability"}},
"issues": [{{"requirement_id", "severity", "description"}}]}}.
- Each score is in [0, 1].
- "severity" is one of critical, major, minor.
- Report one issue per concrete defect, tied to the offending requirement id.

Target subsystem: {}

Strategy (JSON):
{}

Source requirements (JSON):
{}

Decomposed requirements (JSON):
{}"#,
        target_subsystem, strategy_json, sources_json, decomposed_json
    )
}

/// Distill validation issues into guidance for the next Decompose call.
/// Issues are grouped by requirement id and listed most-severe-first.
pub(crate) fn summarize_issues(issues: &[ValidationIssue], overall: f64) -> String {
    let mut by_requirement: BTreeMap<&str, Vec<&ValidationIssue>> = BTreeMap::new();
    for issue in issues {
        by_requirement
            .entry(issue.requirement_id.as_str())
            .or_default()
            .push(issue);
    }

    let mut feedback = format!(
        "Previous decomposition scored {:.2} overall. Address the following issues:\n",
        overall
    );
    for (requirement_id, mut group) in by_requirement {
        group.sort_by_key(|issue| issue.severity);
        let details: Vec<String> = group
            .iter()
            .map(|issue| format!("[{}] {}", issue.severity, issue.description))
            .collect();
        feedback.push_str(&format!("- {}: {}\n", requirement_id, details.join("; ")));
    }
    feedback
}
