//! Pipeline stages.
//!
//! Each analysis stage is a free async function taking the run record by
//! value and returning the merged successor, the shared context holding
//! the injected collaborators, and nothing else. The engine owns
//! sequencing, timeouts, and checkpointing; stages own their prompt, the
//! interpretation of the model response, and their own cost/energy
//! accounting.

pub mod analyze;
pub mod decompose;
pub mod document;
pub mod extract;
pub mod validate;

use crate::config::{ModelRates, RunConfig};
use crate::llm::StageClient;
use crate::parser::DocumentParser;

/// Stage names used as breakdown keys, checkpoint labels, and event tags.
pub const EXTRACT: &str = "extract";
pub const ANALYZE: &str = "analyze";
pub const DECOMPOSE: &str = "decompose";
pub const VALIDATE: &str = "validate";
pub const HUMAN_REVIEW: &str = "human_review";
pub const PRE_REVIEW: &str = "pre_review";
pub const DOCUMENT: &str = "document";
pub const ENGINE: &str = "engine";

/// Collaborators and configuration shared by all stages of one run.
pub struct StageContext<'a> {
    pub client: &'a dyn StageClient,
    pub parser: &'a dyn DocumentParser,
    pub config: &'a RunConfig,
    pub rates: &'a ModelRates,
}
