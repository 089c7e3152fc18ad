//! Extract stage: source document to structured requirements.
//!
//! Parses the input document through the injected parser and asks the
//! stage client to pull out individual requirement statements. An empty
//! result is a valid outcome (some documents contain no
//! requirement statements), so downstream stages must not treat it as an
//! error.

use serde::Deserialize;

use crate::error::StageError;
use crate::llm::{invoke_with_retry, ResponseSchema};
use crate::metrics;
use crate::record::{Requirement, RunRecord};
use crate::stages::{StageContext, EXTRACT};

#[derive(Debug, Deserialize)]
struct RequirementListPayload {
    requirements: Vec<Requirement>,
}

pub async fn run(
    mut record: RunRecord,
    ctx: &StageContext<'_>,
) -> Result<RunRecord, StageError> {
    let document = ctx.parser.parse(&record.spec_path).await?;

    let prompt = build_prompt(&record.target_subsystem, &document);
    let response = invoke_with_retry(ctx.client, &prompt, ResponseSchema::RequirementList).await?;

    let payload: RequirementListPayload = serde_json::from_value(response.output.clone())
        .map_err(|e| StageError::MalformedResponse(format!("requirement list: {}", e)))?;

    record.extracted_requirements = payload.requirements;

    metrics::record_cost(
        &mut record,
        ctx.rates,
        EXTRACT,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );
    metrics::record_energy(
        &mut record,
        ctx.rates,
        EXTRACT,
        &response.model_id,
        response.tokens_in,
        response.tokens_out,
    );

    Ok(record)
}

fn build_prompt(target_subsystem: &str, document: &str) -> String {
    format!(
        r#"Extract every individual requirement statement from the source document below.

Return JSON: {{"requirements": [{{"id", "text", "kind", "source_location"}}]}}.
- Keep requirement ids from the document when present; otherwise assign sequential REQ-NNN ids.
- "kind" is one of functional, performance, interface, safety, constraint.
- "source_location" names where the statement appears (e.g. "line 12").
- Do not invent requirements; extract only what the document states.

Target subsystem: {}

Source document:
{}"#,
        target_subsystem, document
    )
}
