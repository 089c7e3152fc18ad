//! Final report rendering.
//!
//! Pure string builders over the run record; the Document stage and the
//! engine's abort path decide where the rendered markdown lands. Three
//! shapes exist: the success bundle (requirements document, traceability
//! mapping, quality report), the zero-allocation explanation that
//! replaces the requirements document when nothing allocated, and the
//! abort report citing the fatal condition.

use chrono::Local;
use std::collections::BTreeMap;

use crate::record::{RunRecord, ValidationType};

/// Subsystem requirements document for a successful run.
pub fn requirements_document(record: &RunRecord) -> String {
    let mut doc = format!(
        "# {} Subsystem Requirements\n\nRun: {}\nGenerated: {}\nSource: {}\n\n",
        record.target_subsystem,
        record.run_id,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.spec_path.display()
    );

    doc.push_str(&format!(
        "{} requirements derived from {} source requirements.\n\n",
        record.decomposed_requirements.len(),
        record.extracted_requirements.len()
    ));

    for requirement in &record.decomposed_requirements {
        doc.push_str(&format!("## {}\n\n{}\n\n", requirement.id, requirement.text));
        if !requirement.parent_ids.is_empty() {
            doc.push_str(&format!("Traces to: {}\n\n", requirement.parent_ids.join(", ")));
        }
        if let Some(rationale) = &requirement.rationale {
            doc.push_str(&format!("Rationale: {}\n\n", rationale));
        }
    }
    doc
}

/// Parent-to-children traceability mapping.
pub fn traceability_map(record: &RunRecord) -> String {
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for requirement in &record.decomposed_requirements {
        for parent in &requirement.parent_ids {
            children
                .entry(parent.as_str())
                .or_default()
                .push(requirement.id.as_str());
        }
    }

    let mut doc = format!(
        "# Traceability: {} → {}\n\nRun: {}\n\n",
        record.spec_path.display(),
        record.target_subsystem,
        record.run_id
    );
    doc.push_str("| Source requirement | Subsystem requirements |\n|---|---|\n");
    for source in &record.extracted_requirements {
        let derived = children
            .get(source.id.as_str())
            .map(|ids| ids.join(", "))
            .unwrap_or_else(|| "—".to_string());
        doc.push_str(&format!("| {} | {} |\n", source.id, derived));
    }

    let orphans: Vec<&str> = record
        .decomposed_requirements
        .iter()
        .filter(|r| r.parent_ids.is_empty())
        .map(|r| r.id.as_str())
        .collect();
    if !orphans.is_empty() {
        doc.push_str(&format!(
            "\nSystem-level fallbacks without a parent: {}\n",
            orphans.join(", ")
        ));
    }
    doc
}

/// Quality gate outcome, per-dimension scores, and run accounting.
pub fn quality_report(record: &RunRecord) -> String {
    let mut doc = format!(
        "# Quality Report\n\nRun: {}\nSubsystem: {}\n\n",
        record.run_id, record.target_subsystem
    );

    match &record.quality_metrics {
        Some(metrics) => {
            doc.push_str(&format!(
                "| Dimension | Score |\n|---|---|\n\
                 | Completeness | {:.2} |\n\
                 | Clarity | {:.2} |\n\
                 | Testability | {:.2} |\n\
                 | Traceability | {:.2} |\n\
                 | **Overall** | **{:.2}** |\n\n",
                metrics.completeness,
                metrics.clarity,
                metrics.testability,
                metrics.traceability,
                metrics.overall
            ));
            if metrics.validation_type == ValidationType::NoRequirementsAllocated {
                doc.push_str("Validation type: no requirements allocated (scoring bypassed).\n\n");
            }
        }
        None => doc.push_str("No validation was performed.\n\n"),
    }

    doc.push_str(&format!(
        "Validation passed: {}\nRefinement iterations: {} of {}\n\n",
        record.validation_passed, record.iteration_count, record.max_iterations
    ));

    if !record.validation_issues.is_empty() {
        doc.push_str("## Open issues\n\n");
        for issue in &record.validation_issues {
            doc.push_str(&format!(
                "- {} [{}]: {}\n",
                issue.requirement_id, issue.severity, issue.description
            ));
        }
        doc.push('\n');
    }

    doc.push_str("## Run accounting\n\n| Stage | Cost ($) | Energy (Wh) | Time (s) |\n|---|---|---|---|\n");
    let mut stages: Vec<&String> = record
        .cost_breakdown
        .keys()
        .chain(record.energy_breakdown.keys())
        .chain(record.timing_breakdown.keys())
        .collect();
    stages.sort();
    stages.dedup();
    for stage in stages {
        doc.push_str(&format!(
            "| {} | {:.4} | {:.3} | {:.2} |\n",
            stage,
            record.cost_breakdown.get(stage).copied().unwrap_or(0.0),
            record.energy_breakdown.get(stage).copied().unwrap_or(0.0),
            record.timing_breakdown.get(stage).copied().unwrap_or(0.0)
        ));
    }
    doc.push_str(&format!(
        "| **total** | **{:.4}** | **{:.3}** | |\n",
        record.total_cost, record.total_energy_wh
    ));
    doc
}

/// Explanation written instead of a requirements document when no source
/// requirement allocated to the target subsystem.
pub fn allocation_explanation(record: &RunRecord) -> String {
    let mut doc = format!(
        "# Allocation Result: {}\n\nRun: {}\n\nNo source requirement allocates to the {} subsystem. \
         This is a valid outcome, not a failure: the {} source requirements were examined and none \
         fall within this subsystem's responsibility.\n\n",
        record.target_subsystem,
        record.run_id,
        record.target_subsystem,
        record.extracted_requirements.len()
    );

    if let Some(strategy) = &record.decomposition_strategy {
        doc.push_str(&format!("Allocation approach: {}\n\n", strategy.approach));
        if !strategy.allocation_rules.is_empty() {
            doc.push_str("Rules applied:\n");
            for rule in &strategy.allocation_rules {
                doc.push_str(&format!("- {}\n", rule));
            }
            doc.push('\n');
        }
    }

    doc.push_str("Source requirements examined:\n");
    for source in &record.extracted_requirements {
        doc.push_str(&format!("- {}: {}\n", source.id, source.text));
    }
    doc
}

/// Error report for an aborted run.
pub fn abort_report(record: &RunRecord, last_checkpoint_seq: i64) -> String {
    let mut doc = format!(
        "# Run Aborted\n\nRun: {}\nSubsystem: {}\nGenerated: {}\n\n",
        record.run_id,
        record.target_subsystem,
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    match record.errors.last() {
        Some(error) => doc.push_str(&format!(
            "Abort condition: [{}] {} — {}\n\n",
            error.class, error.stage, error.message
        )),
        None => doc.push_str("Abort condition: reviewer aborted the run.\n\n"),
    }

    doc.push_str(&format!(
        "Last checkpoint: sequence {} (resume with `reqflow resume {}`).\n\n",
        last_checkpoint_seq, record.run_id
    ));
    doc.push_str(&format!(
        "Spent before abort: ${:.4}, {:.3} Wh, {} refinement iteration(s).\n\n",
        record.total_cost, record.total_energy_wh, record.iteration_count
    ));

    if !record.error_log.is_empty() {
        doc.push_str("## Error history\n\n");
        for entry in &record.error_log {
            doc.push_str(&format!(
                "- {} [{}] {}: {}\n",
                entry.timestamp.format("%H:%M:%S"),
                entry.class,
                entry.stage,
                entry.message
            ));
        }
    }
    doc
}
