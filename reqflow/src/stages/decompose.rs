//! Decompose stage: produce subsystem-level requirements.
//!
//! Applies the strategy from Analyze to the extracted requirements and
//! rewrites the allocated ones at subsystem scope, carrying parent ids
//! for traceability. The output fully replaces any previous
//! decomposition; refinement retries never append to a stale result.
//! When the record carries refinement feedback from a failed validation
//! or a reviewer, it is handed to the client verbatim.

use serde::Deserialize;

use crate::error::StageError;
use crate::llm::{invoke_with_retry, ResponseSchema};
use crate::metrics;
use crate::record::{RunRecord, SubsystemRequirement};
use crate::stages::{StageContext, DECOMPOSE};

#[derive(Debug, Deserialize)]
struct SubsystemListPayload {
    requirements: Vec<SubsystemRequirement>,
}

pub async fn run(
    mut record: RunRecord,
    ctx: &StageContext<'_>,
) -> Result<RunRecord, StageError> {
    let strategy = record
        .decomposition_strategy
        .as_ref()
        .ok_or_else(|| StageError::Internal("decompose invoked without a strategy".to_string()))?;

    let strategy_json = serde_json::to_string_pretty(strategy)
        .map_err(|e| StageError::Serialization(e.to_string()))?;
    let sources_json = serde_json::to_string_pretty(&record.extracted_requirements)
        .map_err(|e| StageError::Serialization(e.to_string()))?;
    let prompt = build_prompt(
        &record.target_subsystem,
        record.refinement_feedback.as_deref(),
        &strategy_json,
        &sources_json,
    );

    let response =
        invoke_with_retry(ctx.client, &prompt, ResponseSchema::SubsystemRequirementList).await?;

    let payload: SubsystemListPayload = serde_json::from_value(response.output.clone())
        .map_err(|e| StageError::MalformedResponse(format!("subsystem requirements: {}", e)))?;

    // Replace, never append: each decomposition stands on its own.
    record.decomposed_requirements = payload.requirements;

    metrics::record_cost(
        &mut record,
        ctx.rates,
        DECOMPOSE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );
    metrics::record_energy(
        &mut record,
        ctx.rates,
        DECOMPOSE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );

    Ok(record)
}

fn build_prompt(
    target_subsystem: &str,
    feedback: Option<&str>,
    strategy_json: &str,
    sources_json: &str,
) -> String {
    let mut prompt = format!(
        r#"Decompose the source requirements into requirements for the target subsystem,
following the allocation strategy.

Return JSON: {{"requirements": [{{"id", "text", "parent_ids", "rationale"}}]}}.
- Every derived requirement lists the source ids it traces to in "parent_ids".
- Phrase each derived requirement as a subsystem-level "shall" statement.
- Return an empty list when no source requirement allocates to the subsystem.

Target subsystem: {}
"#,
        target_subsystem
    );

    if let Some(feedback) = feedback {
        prompt.push_str(&format!("\nRefinement feedback:\n{}\n", feedback));
    }

    prompt.push_str(&format!(
        "\nStrategy (JSON):\n{}\n\nSource requirements (JSON):\n{}\n",
        strategy_json, sources_json
    ));
    prompt
}
