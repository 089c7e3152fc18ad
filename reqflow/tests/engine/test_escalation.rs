//! Escalation paths: iteration ceiling, scoring errors, and timeouts.

use super::common::*;
use reqflow::engine::EngineState;
use reqflow::error::ErrorClass;
use reqflow::llm::{ResponseSchema, ScriptedOutcome};
use reqflow::record::ReviewDecision;
use reqflow::review::AutoPolicy;
use reqflow::store::Database;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn three_failing_validations_escalate_to_human_review() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output); // max_iterations = 3

    let client = happy_path_client(1000, 500);
    // One failing assessment; the scripted client repeats its last entry,
    // so every validation cycle fails the gate.
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.60, json!([])),
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
    assert_eq!(record.iteration_count, 3);
    assert!(!record.validation_passed);
    assert!(record.requires_human_review);
    assert_eq!(record.human_review_decision, Some(ReviewDecision::Abort));
    // extract + analyze + 3x decompose + 3x validate
    assert_eq!(client.invocations(), 8);
}

#[tokio::test]
async fn reviewer_can_approve_past_a_failing_gate() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.60, json!([])),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        Arc::new(AutoPolicy::approve()),
    );
    let outcome = engine.run().await.unwrap();

    // The ceiling escalated, the reviewer approved, the run documented.
    assert_eq!(outcome.state, EngineState::Done);
    assert!(!outcome.record.validation_passed);
    assert_eq!(
        outcome.record.human_review_decision,
        Some(ReviewDecision::Approve)
    );
}

#[tokio::test]
async fn scoring_error_escalates_even_without_gate_failure() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    client.push(
        ResponseSchema::QualityAssessment,
        ScriptedOutcome::ContextOverflow,
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Aborted);
    assert!(record.requires_human_review);
    // The scoring error was recorded, not swallowed.
    assert!(record
        .errors
        .iter()
        .any(|e| e.stage == "validate" && e.message.contains("context window")));
    // A scoring error is not a refinement iteration.
    assert_eq!(record.iteration_count, 0);
}

#[tokio::test]
async fn stage_timeout_routes_to_human_review() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&spec, &output);
    config.stage_timeouts.decompose_secs = 0;

    let inner = happy_path_client(1000, 500);
    let client = Arc::new(SlowClient {
        inner: inner.clone(),
        slow_schema: ResponseSchema::SubsystemRequirementList,
        delay: Duration::from_millis(200),
    });

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client,
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Aborted);
    assert!(record.requires_human_review);
    let timeout_entry = record
        .error_log
        .iter()
        .find(|e| e.message.contains("timed out"))
        .expect("timeout recorded");
    assert_eq!(timeout_entry.stage, "decompose");
    assert_eq!(timeout_entry.class, ErrorClass::Escalation);
}
