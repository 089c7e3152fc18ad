//! Zero-allocation scenarios: no source requirement maps to the target.

use super::common::*;
use reqflow::engine::EngineState;
use reqflow::llm::{ResponseSchema, RuleBasedClient};
use reqflow::record::ValidationType;
use reqflow::review::AutoPolicy;
use reqflow::store::Database;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn all_power_requirements_against_navigation_yield_empty_allocation() {
    // Ten source requirements, all about the Power subsystem.
    let mut content = String::new();
    for i in 1..=10 {
        content.push_str(&format!(
            "PWR-{:03}: The system shall supply regulated power to load {}.\n",
            i, i
        ));
    }
    let spec = spec_file(&content);
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&spec, &output);
    config.target_subsystem = "Navigation".to_string();

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        Arc::new(RuleBasedClient),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();
    let record = &outcome.record;

    assert_eq!(outcome.state, EngineState::Done);
    assert_eq!(record.extracted_requirements.len(), 10);
    assert!(record.decomposed_requirements.is_empty());
    assert!(record.validation_passed);
    assert_eq!(record.iteration_count, 0);

    let metrics = record.quality_metrics.as_ref().unwrap();
    assert_eq!(metrics.overall, 1.0);
    assert_eq!(
        metrics.validation_type,
        ValidationType::NoRequirementsAllocated
    );

    // An allocation explanation replaces the requirements document.
    let allocation = output
        .path()
        .join(format!("{}_allocation.md", record.run_id));
    let requirements = output
        .path()
        .join(format!("{}_requirements.md", record.run_id));
    assert!(allocation.exists());
    assert!(!requirements.exists());
}

#[tokio::test]
async fn empty_decomposition_skips_the_scoring_call() {
    let spec = spec_file("placeholder\n");
    let output = tempfile::tempdir().unwrap();
    let config = test_config(&spec, &output);

    let client = Arc::new(reqflow::llm::ScriptedClient::new("analyst-large", 500, 100));
    client.push_output(
        ResponseSchema::RequirementList,
        requirements_payload(&["SYS-001"]),
    );
    client.push_output(ResponseSchema::Strategy, strategy_payload(&[]));
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        json!({"requirements": []}),
    );

    let mut engine = engine_with(
        config,
        Database::new_in_memory().unwrap(),
        client.clone(),
        Arc::new(AutoPolicy::abort()),
    );
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.state, EngineState::Done);
    assert!(outcome.record.validation_passed);
    // Validate never reached the client: extract, strategy, decompose only.
    assert_eq!(client.invocations(), 3);
}
