//! Document stage: write the final report bundle.
//!
//! Terminal stage of the success path. A normal run gets a requirements
//! document, a traceability mapping, and a quality report; a
//! zero-allocation run gets an allocation explanation in place of the
//! requirements document. No model call is involved.

use tokio::fs;

use crate::error::StageError;
use crate::record::{RunRecord, ValidationType};
use crate::report;
use crate::stages::StageContext;

pub async fn run(
    record: RunRecord,
    ctx: &StageContext<'_>,
) -> Result<RunRecord, StageError> {
    let dir = &ctx.config.output_dir;
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StageError::Io(format!("create {}: {}", dir.display(), e)))?;

    let zero_allocation = record
        .quality_metrics
        .as_ref()
        .map(|m| m.validation_type == ValidationType::NoRequirementsAllocated)
        .unwrap_or(false);

    let mut outputs = Vec::new();
    if zero_allocation {
        outputs.push((
            format!("{}_allocation.md", record.run_id),
            report::allocation_explanation(&record),
        ));
    } else {
        outputs.push((
            format!("{}_requirements.md", record.run_id),
            report::requirements_document(&record),
        ));
        outputs.push((
            format!("{}_traceability.md", record.run_id),
            report::traceability_map(&record),
        ));
    }
    outputs.push((
        format!("{}_quality.md", record.run_id),
        report::quality_report(&record),
    ));

    for (name, content) in outputs {
        let path = dir.join(name);
        fs::write(&path, content)
            .await
            .map_err(|e| StageError::Io(format!("write {}: {}", path.display(), e)))?;
        reqflow_sdk::log_file_saved!(path.display());
    }

    Ok(record)
}
