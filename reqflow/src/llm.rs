//! LLM stage-client seam.
//!
//! Stages talk to models through [`StageClient`]: one call in, one
//! structured JSON value out, plus token counts and the model id that
//! served the request. Responses are validated against an explicit
//! expected shape at the stage boundary; a response that does not match
//! is a [`StageError::MalformedResponse`], never a silent default.
//!
//! Two implementations ship with the crate:
//! - [`RuleBasedClient`]: deterministic keyword-driven analysis with no
//!   network access, for offline runs and dry-runs.
//! - [`ScriptedClient`]: replays canned responses, for driving the
//!   engine in tests and demos.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::StageError;
use crate::record::{Requirement, RequirementKind};

/// Expected shape of a stage response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSchema {
    /// `{"requirements": [{"id", "text", ...}]}`
    RequirementList,
    /// `{"approach", "allocation_rules": [..], "candidate_requirement_ids": [..]}`
    Strategy,
    /// `{"requirements": [{"id", "text", "parent_ids": [..], ...}]}`
    SubsystemRequirementList,
    /// `{"scores": {completeness, clarity, testability, traceability}, "issues": [..]}`
    QualityAssessment,
}

impl ResponseSchema {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseSchema::RequirementList => "requirement_list",
            ResponseSchema::Strategy => "strategy",
            ResponseSchema::SubsystemRequirementList => "subsystem_requirement_list",
            ResponseSchema::QualityAssessment => "quality_assessment",
        }
    }

    /// Check a response against this schema. Returns a description of the
    /// first mismatch, which the caller wraps into `MalformedResponse`.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            ResponseSchema::RequirementList | ResponseSchema::SubsystemRequirementList => {
                let items = value
                    .get("requirements")
                    .and_then(Value::as_array)
                    .ok_or("missing 'requirements' array")?;
                for (i, item) in items.iter().enumerate() {
                    if item.get("id").and_then(Value::as_str).is_none() {
                        return Err(format!("requirements[{}] missing string 'id'", i));
                    }
                    if item.get("text").and_then(Value::as_str).is_none() {
                        return Err(format!("requirements[{}] missing string 'text'", i));
                    }
                    if *self == ResponseSchema::SubsystemRequirementList
                        && item.get("parent_ids").and_then(Value::as_array).is_none()
                    {
                        return Err(format!("requirements[{}] missing 'parent_ids' array", i));
                    }
                }
                Ok(())
            }
            ResponseSchema::Strategy => {
                if value.get("approach").and_then(Value::as_str).is_none() {
                    return Err("missing string 'approach'".to_string());
                }
                if value
                    .get("allocation_rules")
                    .and_then(Value::as_array)
                    .is_none()
                {
                    return Err("missing 'allocation_rules' array".to_string());
                }
                Ok(())
            }
            ResponseSchema::QualityAssessment => {
                let scores = value
                    .get("scores")
                    .and_then(Value::as_object)
                    .ok_or("missing 'scores' object")?;
                for dim in ["completeness", "clarity", "testability", "traceability"] {
                    let score = scores
                        .get(dim)
                        .and_then(Value::as_f64)
                        .ok_or_else(|| format!("missing numeric score '{}'", dim))?;
                    if !(0.0..=1.0).contains(&score) {
                        return Err(format!("score '{}' out of [0,1]: {}", dim, score));
                    }
                }
                if value.get("issues").and_then(Value::as_array).is_none() {
                    return Err("missing 'issues' array".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Structured output of one model invocation.
#[derive(Debug, Clone)]
pub struct StageResponse {
    pub output: Value,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model_id: String,
}

/// One model invocation per call; the implementation owns model
/// selection and fallback.
#[async_trait]
pub trait StageClient: Send + Sync {
    async fn invoke(&self, prompt: &str, schema: ResponseSchema)
        -> Result<StageResponse, StageError>;
}

/// Bounded sequential attempts per stage call.
const MAX_ATTEMPTS: usize = 3;

/// Invoke the client with schema validation and bounded retries.
///
/// Rate limits and malformed responses are retried; context overflow and
/// everything else fail fast. Exhausting all attempts is fatal.
pub async fn invoke_with_retry(
    client: &dyn StageClient,
    prompt: &str,
    schema: ResponseSchema,
) -> Result<StageResponse, StageError> {
    let mut last_error = String::new();
    for _ in 0..MAX_ATTEMPTS {
        match client.invoke(prompt, schema).await {
            Ok(response) => match schema.validate(&response.output) {
                Ok(()) => return Ok(response),
                Err(mismatch) => {
                    last_error = format!("schema '{}': {}", schema.name(), mismatch);
                }
            },
            Err(err @ StageError::RateLimited { .. })
            | Err(err @ StageError::MalformedResponse(_)) => {
                last_error = err.to_string();
            }
            Err(other) => return Err(other),
        }
    }
    Err(StageError::ClientExhausted(format!(
        "{} attempts, last error: {}",
        MAX_ATTEMPTS, last_error
    )))
}

// ---------------------------------------------------------------------------
// Rule-based offline client
// ---------------------------------------------------------------------------

/// Deterministic keyword-driven client for offline runs.
///
/// The client reads the structured sections the stages embed in their
/// prompts (`Target subsystem:`, `... (JSON):` blocks) and produces
/// schema-conforming output with no network access. Token counts are
/// approximated at four characters per token; the reported model id is
/// `offline`, which the default rate table prices at zero.
pub struct RuleBasedClient;

impl RuleBasedClient {
    const MODEL_ID: &'static str = "offline";

    fn response(&self, prompt: &str, output: Value) -> StageResponse {
        let rendered = output.to_string();
        StageResponse {
            tokens_in: (prompt.len() / 4) as u64,
            tokens_out: (rendered.len() / 4) as u64,
            model_id: Self::MODEL_ID.to_string(),
            output,
        }
    }

    fn extract_requirements(prompt: &str) -> Value {
        let document = section_after(prompt, "Source document:").unwrap_or(prompt);
        let mut requirements = Vec::new();
        let mut counter = 0usize;
        for (line_no, line) in document.lines().enumerate() {
            let line = line.trim();
            if !line.to_ascii_lowercase().contains("shall") {
                continue;
            }
            counter += 1;
            let (id, text) = split_requirement_id(line, counter);
            requirements.push(json!({
                "id": id,
                "text": text,
                "kind": classify_kind(&text),
                "source_location": format!("line {}", line_no + 1),
            }));
        }
        json!({ "requirements": requirements })
    }

    fn build_strategy(prompt: &str) -> Value {
        let subsystem = prompt_field(prompt, "Target subsystem:").unwrap_or_default();
        let sources: Vec<Requirement> = json_block(prompt, "Source requirements (JSON):")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let keywords = subsystem_keywords(&subsystem);
        let candidates: Vec<String> = sources
            .iter()
            .filter(|r| matches_keywords(&r.text, &keywords))
            .map(|r| r.id.clone())
            .collect();

        json!({
            "approach": format!(
                "Allocate source requirements to the {} subsystem by functional responsibility, \
                 then restate each allocated requirement at subsystem scope.",
                subsystem
            ),
            "allocation_rules": [
                format!("Allocate requirements whose text names the {} subsystem or its functions", subsystem),
                "Preserve the parent requirement id in every derived requirement".to_string(),
                "Restate allocated requirements as subsystem-level 'shall' statements".to_string(),
            ],
            "candidate_requirement_ids": candidates,
        })
    }

    fn decompose(prompt: &str) -> Value {
        let subsystem = prompt_field(prompt, "Target subsystem:").unwrap_or_default();
        let sources: Vec<Requirement> = json_block(prompt, "Source requirements (JSON):")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let candidates: BTreeSet<String> = json_block(prompt, "Strategy (JSON):")
            .and_then(|v| {
                v.get("candidate_requirement_ids")
                    .cloned()
                    .and_then(|ids| serde_json::from_value(ids).ok())
            })
            .unwrap_or_default();

        let keywords = subsystem_keywords(&subsystem);
        let prefix = subsystem_prefix(&subsystem);
        let mut requirements = Vec::new();
        for source in &sources {
            let allocated = if candidates.is_empty() {
                matches_keywords(&source.text, &keywords)
            } else {
                candidates.contains(&source.id)
            };
            if !allocated {
                continue;
            }
            let n = requirements.len() + 1;
            requirements.push(json!({
                "id": format!("{}-{:03}", prefix, n),
                "text": subsystem_statement(&source.text, &subsystem),
                "parent_ids": [source.id],
                "rationale": format!("Allocated from {} by subsystem responsibility", source.id),
            }));
        }
        json!({ "requirements": requirements })
    }

    fn assess_quality(prompt: &str) -> Value {
        let decomposed: Vec<Value> = json_block(prompt, "Decomposed requirements (JSON):")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let candidates: BTreeSet<String> = json_block(prompt, "Strategy (JSON):")
            .and_then(|v| {
                v.get("candidate_requirement_ids")
                    .cloned()
                    .and_then(|ids| serde_json::from_value(ids).ok())
            })
            .unwrap_or_default();

        let total = decomposed.len().max(1) as f64;
        let mut issues = Vec::new();
        let mut clear = 0usize;
        let mut testable = 0usize;
        let mut traced = 0usize;
        let mut covered: BTreeSet<String> = BTreeSet::new();

        for req in &decomposed {
            let id = req.get("id").and_then(Value::as_str).unwrap_or("?");
            let text = req.get("text").and_then(Value::as_str).unwrap_or("");
            let parents: Vec<String> = req
                .get("parent_ids")
                .cloned()
                .and_then(|p| serde_json::from_value(p).ok())
                .unwrap_or_default();

            if text.to_ascii_lowercase().contains("shall") {
                clear += 1;
            } else {
                issues.push(json!({
                    "requirement_id": id,
                    "severity": "minor",
                    "description": "not phrased as a 'shall' statement",
                }));
            }

            if is_measurable(text) {
                testable += 1;
            } else {
                issues.push(json!({
                    "requirement_id": id,
                    "severity": "minor",
                    "description": "no measurable acceptance criterion",
                }));
            }

            if parents.is_empty() {
                issues.push(json!({
                    "requirement_id": id,
                    "severity": "major",
                    "description": "missing parent traceability",
                }));
            } else {
                traced += 1;
                covered.extend(parents);
            }
        }

        for missing in candidates.difference(&covered) {
            issues.push(json!({
                "requirement_id": missing,
                "severity": "major",
                "description": "candidate source requirement not covered by any subsystem requirement",
            }));
        }

        let completeness = if candidates.is_empty() {
            1.0
        } else {
            covered
                .intersection(&candidates)
                .count() as f64
                / candidates.len() as f64
        };

        json!({
            "scores": {
                "completeness": completeness,
                "clarity": clear as f64 / total,
                "testability": testable as f64 / total,
                "traceability": traced as f64 / total,
            },
            "issues": issues,
        })
    }
}

#[async_trait]
impl StageClient for RuleBasedClient {
    async fn invoke(
        &self,
        prompt: &str,
        schema: ResponseSchema,
    ) -> Result<StageResponse, StageError> {
        let output = match schema {
            ResponseSchema::RequirementList => Self::extract_requirements(prompt),
            ResponseSchema::Strategy => Self::build_strategy(prompt),
            ResponseSchema::SubsystemRequirementList => Self::decompose(prompt),
            ResponseSchema::QualityAssessment => Self::assess_quality(prompt),
        };
        Ok(self.response(prompt, output))
    }
}

fn section_after<'a>(prompt: &'a str, marker: &str) -> Option<&'a str> {
    prompt.find(marker).map(|idx| &prompt[idx + marker.len()..])
}

fn prompt_field(prompt: &str, marker: &str) -> Option<String> {
    let rest = section_after(prompt, marker)?;
    let value = rest.lines().next()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse the first JSON value that follows a marker line.
fn json_block(prompt: &str, marker: &str) -> Option<Value> {
    let rest = section_after(prompt, marker)?;
    let start = rest.find(['[', '{'])?;
    serde_json::Deserializer::from_str(&rest[start..])
        .into_iter::<Value>()
        .next()?
        .ok()
}

fn split_requirement_id(line: &str, counter: usize) -> (String, String) {
    if let Some((head, tail)) = line.split_once(':') {
        let head = head.trim().trim_start_matches(['-', '*', ' ']);
        let looks_like_id = !head.is_empty()
            && head.len() <= 16
            && head.chars().any(|c| c.is_ascii_digit())
            && head
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if looks_like_id {
            return (head.to_string(), tail.trim().to_string());
        }
    }
    (format!("REQ-{:03}", counter), line.trim().to_string())
}

fn classify_kind(text: &str) -> RequirementKind {
    let lower = text.to_ascii_lowercase();
    if lower.contains("within") || lower.contains("latency") || lower.contains("per second") {
        RequirementKind::Performance
    } else if lower.contains("interface") || lower.contains("bus") || lower.contains("protocol") {
        RequirementKind::Interface
    } else if lower.contains("fail-safe") || lower.contains("hazard") || lower.contains("safety") {
        RequirementKind::Safety
    } else if lower.contains("mass") || lower.contains("power budget") || lower.contains("shall not exceed") {
        RequirementKind::Constraint
    } else {
        RequirementKind::Functional
    }
}

fn subsystem_keywords(subsystem: &str) -> Vec<String> {
    subsystem
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

fn matches_keywords(text: &str, keywords: &[String]) -> bool {
    let lower = text.to_ascii_lowercase();
    keywords.iter().any(|k| lower.contains(k.as_str()))
}

fn subsystem_prefix(subsystem: &str) -> String {
    let prefix: String = subsystem
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(3)
        .collect::<String>()
        .to_ascii_uppercase();
    if prefix.is_empty() {
        "SUB".to_string()
    } else {
        prefix
    }
}

fn subsystem_statement(parent_text: &str, subsystem: &str) -> String {
    let lower = parent_text.to_ascii_lowercase();
    if let Some(idx) = lower.find("shall") {
        format!("The {} subsystem shall{}", subsystem, &parent_text[idx + 5..])
    } else {
        format!("The {} subsystem shall satisfy: {}", subsystem, parent_text)
    }
}

fn is_measurable(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    text.chars().any(|c| c.is_ascii_digit())
        || lower.contains("within")
        || lower.contains("at least")
        || lower.contains("no more than")
}

// ---------------------------------------------------------------------------
// Scripted client
// ---------------------------------------------------------------------------

/// Outcome a [`ScriptedClient`] serves for one invocation.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Serve this value as the structured output.
    Output(Value),
    /// Fail with a rate-limit error.
    RateLimited,
    /// Fail with a malformed-response error.
    Malformed(String),
    /// Fail with a context-overflow error.
    ContextOverflow,
}

/// Client that replays canned per-schema responses, in order.
///
/// When a schema's queue runs down to its last entry, that entry is
/// served repeatedly, so a resumed run replays the same data a completed
/// run saw. Token counts and the model id are fixed at construction.
pub struct ScriptedClient {
    responses: Mutex<BTreeMap<&'static str, VecDeque<ScriptedOutcome>>>,
    model_id: String,
    tokens_in: u64,
    tokens_out: u64,
    invocations: AtomicU32,
}

impl ScriptedClient {
    pub fn new(model_id: &str, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            responses: Mutex::new(BTreeMap::new()),
            model_id: model_id.to_string(),
            tokens_in,
            tokens_out,
            invocations: AtomicU32::new(0),
        }
    }

    /// Queue an outcome for a schema. Outcomes are served in push order.
    pub fn push(&self, schema: ResponseSchema, outcome: ScriptedOutcome) {
        self.responses
            .lock()
            .unwrap()
            .entry(schema.name())
            .or_default()
            .push_back(outcome);
    }

    pub fn push_output(&self, schema: ResponseSchema, output: Value) {
        self.push(schema, ScriptedOutcome::Output(output));
    }

    /// Number of `invoke` calls served so far.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageClient for ScriptedClient {
    async fn invoke(
        &self,
        _prompt: &str,
        schema: ResponseSchema,
    ) -> Result<StageResponse, StageError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.entry(schema.name()).or_default();
            match queue.len() {
                0 => None,
                // Keep the final entry so replays see the same data.
                1 => queue.front().cloned(),
                _ => queue.pop_front(),
            }
        };

        match outcome {
            Some(ScriptedOutcome::Output(output)) => Ok(StageResponse {
                output,
                tokens_in: self.tokens_in,
                tokens_out: self.tokens_out,
                model_id: self.model_id.clone(),
            }),
            Some(ScriptedOutcome::RateLimited) => Err(StageError::RateLimited {
                model: self.model_id.clone(),
            }),
            Some(ScriptedOutcome::Malformed(msg)) => Err(StageError::MalformedResponse(msg)),
            Some(ScriptedOutcome::ContextOverflow) => Err(StageError::ContextOverflow {
                model: self.model_id.clone(),
            }),
            None => Err(StageError::MalformedResponse(format!(
                "no scripted response for schema '{}'",
                schema.name()
            ))),
        }
    }
}
