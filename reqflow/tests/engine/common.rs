//! Common test utilities for engine tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqflow::config::{ModelRates, RunConfig};
use reqflow::engine::Engine;
use reqflow::error::StageError;
use reqflow::llm::{ResponseSchema, ScriptedClient, StageClient, StageResponse};
use reqflow::parser::TextParser;
use reqflow::record::{ReviewDecision, RunRecord};
use reqflow::review::{ReviewGate, ReviewOutcome, ReviewPhase};
use reqflow::store::Database;

/// Write a spec file the TextParser accepts.
pub fn spec_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".md").tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

/// Run configuration pointing at a temp spec and temp output dir.
pub fn test_config(spec: &tempfile::NamedTempFile, output: &tempfile::TempDir) -> RunConfig {
    RunConfig {
        spec_path: spec.path().to_path_buf(),
        target_subsystem: "Navigation".to_string(),
        output_dir: output.path().to_path_buf(),
        ..RunConfig::default()
    }
}

pub fn engine_with(
    config: RunConfig,
    store: Database,
    client: Arc<dyn StageClient>,
    gate: Arc<dyn ReviewGate>,
) -> Engine {
    Engine::new(
        config,
        ModelRates::default(),
        store,
        client,
        Arc::new(TextParser),
        gate,
    )
    .unwrap()
}

// -- canned payloads --------------------------------------------------------

pub fn requirements_payload(ids: &[&str]) -> Value {
    let requirements: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            json!({
                "id": id,
                "text": format!("The system shall perform function {}.", i + 1),
                "kind": "functional",
                "source_location": format!("line {}", i + 1),
            })
        })
        .collect();
    json!({ "requirements": requirements })
}

pub fn strategy_payload(candidates: &[&str]) -> Value {
    json!({
        "approach": "Allocate by functional responsibility",
        "allocation_rules": ["allocate navigation functions"],
        "candidate_requirement_ids": candidates,
    })
}

pub fn decomposition_payload(entries: &[(&str, &str)]) -> Value {
    let requirements: Vec<Value> = entries
        .iter()
        .map(|(id, parent)| {
            json!({
                "id": id,
                "text": format!("The Navigation subsystem shall satisfy {} within 5 s.", parent),
                "parent_ids": [parent],
            })
        })
        .collect();
    json!({ "requirements": requirements })
}

pub fn assessment_payload(score: f64, issues: Value) -> Value {
    json!({
        "scores": {
            "completeness": score,
            "clarity": score,
            "testability": score,
            "traceability": score,
        },
        "issues": issues,
    })
}

/// Scripted client covering the happy path up to validation; tests queue
/// their own assessments and extra decompositions on top.
pub fn happy_path_client(tokens_in: u64, tokens_out: u64) -> Arc<ScriptedClient> {
    let client = Arc::new(ScriptedClient::new("analyst-large", tokens_in, tokens_out));
    client.push_output(
        ResponseSchema::RequirementList,
        requirements_payload(&["SYS-001", "SYS-002"]),
    );
    client.push_output(ResponseSchema::Strategy, strategy_payload(&["SYS-001"]));
    client.push_output(
        ResponseSchema::SubsystemRequirementList,
        decomposition_payload(&[("NAV-001", "SYS-001")]),
    );
    client
}

// -- scripted review gate ---------------------------------------------------

/// Serves scripted review outcomes in order; the last one repeats.
pub struct ScriptedGate {
    outcomes: Mutex<Vec<(ReviewDecision, Option<String>)>>,
    pub phases_seen: Mutex<Vec<String>>,
}

impl ScriptedGate {
    pub fn new(outcomes: Vec<(ReviewDecision, Option<String>)>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            phases_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReviewGate for ScriptedGate {
    async fn review(
        &self,
        _record: &RunRecord,
        phase: ReviewPhase,
    ) -> Result<ReviewOutcome, StageError> {
        self.phases_seen
            .lock()
            .unwrap()
            .push(phase.as_str().to_string());
        let mut outcomes = self.outcomes.lock().unwrap();
        let (decision, notes) = if outcomes.len() > 1 {
            outcomes.remove(0)
        } else {
            outcomes
                .first()
                .cloned()
                .unwrap_or((ReviewDecision::Abort, None))
        };
        Ok(ReviewOutcome { decision, notes })
    }
}

// -- slow client for timeout tests ------------------------------------------

/// Delegates to an inner scripted client, sleeping first for one schema so
/// a per-stage timeout can fire.
pub struct SlowClient {
    pub inner: Arc<ScriptedClient>,
    pub slow_schema: ResponseSchema,
    pub delay: Duration,
}

#[async_trait]
impl StageClient for SlowClient {
    async fn invoke(
        &self,
        prompt: &str,
        schema: ResponseSchema,
    ) -> Result<StageResponse, StageError> {
        if schema == self.slow_schema {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.invoke(prompt, schema).await
    }
}

/// File-backed database inside a temp dir, for tests that reopen the store.
pub fn file_db(dir: &tempfile::TempDir, name: &str) -> Database {
    let db = Database::new(db_path(dir, name)).unwrap();
    db.initialize_schema().unwrap();
    db
}

pub fn db_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(format!("{}.db", name))
}
