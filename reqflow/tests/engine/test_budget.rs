//! Budget guard scenarios.

use super::common::*;
use reqflow::engine::EngineState;
use reqflow::error::ErrorClass;
use reqflow::llm::{ResponseSchema, ScriptedClient};
use reqflow::review::AutoPolicy;
use reqflow::store::Database;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn exceeding_max_budget_aborts_before_the_next_stage() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output); // max_budget = $5.00

    // Each call prices at 1000 * 0.003 = $3.00 on analyst-large.
    let client = Arc::new(ScriptedClient::new("analyst-large", 1_000_000, 0));
    client.push_output(
        ResponseSchema::RequirementList,
        requirements_payload(&["SYS-001"]),
    );
    client.push_output(ResponseSchema::Strategy, strategy_payload(&["SYS-001"]));
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        decomposition_payload(&[("NAV-001", "SYS-001")]),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Aborted);
    // Extract ($3) and Analyze ($6 total) ran; Decompose never did.
    assert_eq!(client.invocations(), 2);
    assert!(record
        .errors
        .iter()
        .any(|e| e.message.contains("budget exceeded")));

    // The aborted run is still auditable: abort report on disk.
    let abort = output.path().join(format!("{}_abort.md", record.run_id));
    assert!(abort.exists());
}

#[tokio::test]
async fn crossing_warning_budget_marks_a_single_warning() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&spec, &output);
    config.warning_budget = 1.00;
    config.max_budget = 100.0;

    // $0.60 per call: crosses $1.00 after the second call.
    let client = Arc::new(ScriptedClient::new("analyst-large", 200_000, 0));
    client.push_output(
        ResponseSchema::RequirementList,
        requirements_payload(&["SYS-001"]),
    );
    client.push_output(ResponseSchema::Strategy, strategy_payload(&["SYS-001"]));
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        decomposition_payload(&[("NAV-001", "SYS-001")]),
    );
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.95, json!([])),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Done);
    let warnings: Vec<_> = record
        .error_log
        .iter()
        .filter(|e| e.class == ErrorClass::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("warning budget"));
    // Warnings never escalate.
    assert!(record.errors.is_empty());
}
