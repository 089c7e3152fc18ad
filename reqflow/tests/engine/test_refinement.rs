//! Quality-gated refinement loop scenarios.

use super::common::*;
use reqflow::engine::EngineState;
use reqflow::llm::ResponseSchema;
use reqflow::review::AutoPolicy;
use reqflow::store::Database;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn failing_then_passing_validation_takes_one_iteration() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    // Second decomposition attempt after the failed gate.
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        decomposition_payload(&[("NAV-001", "SYS-001"), ("NAV-002", "SYS-001")]),
    );
    // First validation scores 0.72 (below the 0.80 gate), second 0.90.
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(
            0.72,
            json!([{"requirement_id": "NAV-001", "severity": "major", "description": "incomplete coverage"}]),
        ),
    );
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.90, json!([])),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Done);
    assert_eq!(record.iteration_count, 1);
    assert!(record.validation_passed);
    // Feedback produced by the failed cycle is retained on the record.
    let feedback = record.refinement_feedback.as_ref().unwrap();
    assert!(feedback.contains("0.72"));
    assert!(feedback.contains("incomplete coverage"));
    // The second decomposition replaced the first.
    assert_eq!(record.decomposed_requirements.len(), 2);
    // Issues are rebuilt per validation; the passing pass found none.
    assert!(record.validation_issues.is_empty());
    // extract + analyze + 2x decompose + 2x validate
    assert_eq!(client.invocations(), 6);
}

#[tokio::test]
async fn accumulators_stay_consistent_across_iterations() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.72, json!([])),
    );
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.90, json!([])),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    // Six model calls at (1000 in, 500 out) on analyst-large:
    // 1.0 * 0.003 + 0.5 * 0.015 = 0.0105 per call.
    assert!((record.total_cost - 6.0 * 0.0105).abs() < 1e-9);

    let cost_sum: f64 = record.cost_breakdown.values().sum();
    assert!((record.total_cost - cost_sum).abs() < 1e-12);
    let energy_sum: f64 = record.energy_breakdown.values().sum();
    assert!((record.total_energy_wh - energy_sum).abs() < 1e-12);

    // The decompose bucket saw two calls, the extract bucket one.
    assert!(
        record.cost_breakdown["decompose"] > record.cost_breakdown["extract"]
    );
}

#[tokio::test]
async fn passing_first_validation_skips_the_loop() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = happy_path_client(1000, 500);
    client.push_output(
        ResponseSchema::QualityAssessment,
        assessment_payload(0.95, json!([])),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.state, EngineState::Done);
    assert_eq!(outcome.record.iteration_count, 0);
    assert!(outcome.record.refinement_feedback.is_none());
    assert_eq!(client.invocations(), 4);
}
