//! Post-validation routing.
//!
//! The router is a pure function of the run record, invoked only after
//! the Validate stage. The engine acts on the verdict; the router itself
//! has no side effects.

use crate::record::RunRecord;

/// Where the run goes after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Quality gate passed; proceed to the Document stage.
    Pass,
    /// Quality gate failed with iterations remaining; loop back to
    /// Decompose with refinement feedback.
    Revise,
    /// Escalate to a human reviewer.
    HumanReview,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Revise => "revise",
            Verdict::HumanReview => "human_review",
        }
    }
}

/// Decide the next stage. The checks are ordered and the order matters:
/// the conditions are not mutually exclusive, and earlier rules win.
///
/// 1. Any recorded error escalates, even if validation passed.
/// 2. The iteration ceiling escalates, even on a failing score.
/// 3. A passing validation terminates the loop.
/// 4. Everything else is another refinement cycle.
pub fn route(record: &RunRecord) -> Verdict {
    if !record.errors.is_empty() {
        return Verdict::HumanReview;
    }
    if record.iteration_count >= record.max_iterations {
        return Verdict::HumanReview;
    }
    if record.validation_passed {
        return Verdict::Pass;
    }
    Verdict::Revise
}
