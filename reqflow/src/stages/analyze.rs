//! Analyze stage: derive the decomposition strategy.
//!
//! Looks at the extracted requirements and the target subsystem and
//! produces the allocation rules Decompose will follow. Decompose must
//! not run without a strategy, so a successful Analyze always leaves
//! `decomposition_strategy` populated.

use crate::error::StageError;
use crate::llm::{invoke_with_retry, ResponseSchema};
use crate::metrics;
use crate::record::{DecompositionStrategy, RunRecord};
use crate::stages::{StageContext, ANALYZE};

pub async fn run(
    mut record: RunRecord,
    ctx: &StageContext<'_>,
) -> Result<RunRecord, StageError> {
    let sources = serde_json::to_string_pretty(&record.extracted_requirements)
        .map_err(|e| StageError::Serialization(e.to_string()))?;
    let prompt = build_prompt(&record.target_subsystem, &sources);

    let response = invoke_with_retry(ctx.client, &prompt, ResponseSchema::Strategy).await?;

    let strategy: DecompositionStrategy = serde_json::from_value(response.output.clone())
        .map_err(|e| StageError::MalformedResponse(format!("strategy: {}", e)))?;
    record.decomposition_strategy = Some(strategy);

    metrics::record_cost(
        &mut record,
        ctx.rates,
        ANALYZE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );
    metrics::record_energy(
        &mut record,
        ctx.rates,
        ANALYZE,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );

    Ok(record)
}

fn build_prompt(target_subsystem: &str, sources_json: &str) -> String {
    format!(
        r#"Analyze the source requirements and produce allocation rules for decomposing
them into the target subsystem.

Return JSON: {{"approach", "allocation_rules": [..], "candidate_requirement_ids": [..]}}.
- "approach" is a short prose description of the allocation strategy.
- "allocation_rules" are the concrete rules Decompose will apply.
- "candidate_requirement_ids" lists source requirements relevant to the
  target subsystem; leave it empty when nothing applies.

Target subsystem: {}

Source requirements (JSON):
{}"#,
        target_subsystem, sources_json
    )
}
