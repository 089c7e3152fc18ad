//! Human review gates: pre-decomposition checkpoint and escalation.

use super::common::*;
use reqflow::engine::EngineState;
use reqflow::llm::{ResponseSchema, ScriptedOutcome};
use reqflow::record::ReviewDecision;
use reqflow::store::Database;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn pre_review_abort_stops_before_decompose() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&spec, &output);
    config.pre_review = true;

    let client = happy_path_client(1000, 500);
    let gate = Arc::new(ScriptedGate::new(vec![(ReviewDecision::Abort, None)]));

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        gate.clone(),
    );
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.state, EngineState::Aborted);
    // Extract and Analyze ran; Decompose never did.
    assert_eq!(client.invocations(), 2);
    assert_eq!(
        gate.phases_seen.lock().unwrap().as_slice(),
        ["pre_decomposition"]
    );
}

#[tokio::test]
async fn pre_review_approve_continues_the_pipeline() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&spec, &output);
    config.pre_review = true;

    let client = happy_path_client(1000, 500);
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.90, json!([])),
    );
    let gate = Arc::new(ScriptedGate::new(vec![(ReviewDecision::Approve, None)]));

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        gate.clone(),
    );
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.state, EngineState::Done);
    assert!(outcome.record.validation_passed);
    assert_eq!(
        gate.phases_seen.lock().unwrap().as_slice(),
        ["pre_decomposition"]
    );
    // Pre-decomposition approval is not the escalation decision.
    assert!(outcome.record.human_review_decision.is_none());
}

#[tokio::test]
async fn revise_from_escalation_clears_errors_and_carries_guidance() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    // Second decomposition served after the reviewer asks for revision.
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        decomposition_payload(&[("NAV-001", "SYS-001"), ("NAV-002", "SYS-001")]),
    );
    // First validation errors out; the retry scores a clean pass.
    client.push(
        ResponseSchema::QualityAssessment,
        ScriptedOutcome::ContextOverflow,
    );
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.92, json!([])),
    );

    let gate = Arc::new(ScriptedGate::new(vec![(
        ReviewDecision::Revise,
        Some("trim the prompt and focus on timing requirements".to_string()),
    )]));

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        gate.clone(),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Done);
    assert_eq!(gate.phases_seen.lock().unwrap().as_slice(), ["escalation"]);
    assert_eq!(record.human_review_decision, Some(ReviewDecision::Revise));

    // The cycle error was cleared for the new attempt but kept in history.
    assert!(record.errors.is_empty());
    assert!(record
        .error_log
        .iter()
        .any(|e| e.message.contains("context window")));

    // Reviewer guidance reached the next decomposition via feedback.
    let feedback = record.refinement_feedback.as_ref().unwrap();
    assert!(feedback.contains("Reviewer guidance: trim the prompt"));
    assert!(record.validation_passed);
    assert_eq!(record.decomposed_requirements.len(), 2);
}
