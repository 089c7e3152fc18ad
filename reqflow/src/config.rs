//! Run configuration.
//!
//! All knobs for a run live in an explicit immutable `RunConfig` injected
//! into the engine at construction; nothing is read from ambient process
//! state. Model price/energy tables are configuration data too; they can
//! be loaded from a YAML file and fall back to built-in defaults for
//! models the file does not mention.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Weights combining the four quality dimensions into the overall score.
///
/// These are policy constants, not learned values. The defaults weight
/// completeness and traceability highest because a decomposition that
/// drops requirements or loses lineage is worse than one that is merely
/// awkwardly worded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub completeness: f64,
    pub clarity: f64,
    pub testability: f64,
    pub traceability: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.30,
            clarity: 0.20,
            testability: 0.20,
            traceability: 0.30,
        }
    }
}

impl QualityWeights {
    /// Weighted combination of the four dimension scores.
    pub fn overall(&self, completeness: f64, clarity: f64, testability: f64, traceability: f64) -> f64 {
        let sum = self.completeness + self.clarity + self.testability + self.traceability;
        (completeness * self.completeness
            + clarity * self.clarity
            + testability * self.testability
            + traceability * self.traceability)
            / sum
    }
}

/// Per-stage timeout ceilings, in seconds. Later stages get more room
/// because they process the accumulated context of everything before them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub extract_secs: u64,
    pub analyze_secs: u64,
    pub decompose_secs: u64,
    pub validate_secs: u64,
    pub document_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            extract_secs: 120,
            analyze_secs: 180,
            decompose_secs: 240,
            validate_secs: 300,
            document_secs: 60,
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: &str) -> Duration {
        let secs = match stage {
            "extract" => self.extract_secs,
            "analyze" => self.analyze_secs,
            "decompose" => self.decompose_secs,
            "validate" => self.validate_secs,
            "document" => self.document_secs,
            _ => self.validate_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Immutable inputs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Path to the system-level requirements document.
    pub spec_path: PathBuf,
    /// Subsystem the decomposition targets.
    pub target_subsystem: String,
    /// Quality gate: overall score required to pass validation.
    pub quality_threshold: f64,
    /// Refinement ceiling before escalating to a human.
    pub max_iterations: u32,
    /// Accumulated cost above this marks a warning in the run history.
    pub warning_budget: f64,
    /// Accumulated cost at or above this aborts the run.
    pub max_budget: f64,
    /// Insert a human review between Analyze and Decompose.
    pub pre_review: bool,
    /// Directory where final reports are written.
    pub output_dir: PathBuf,
    pub quality_weights: QualityWeights,
    pub stage_timeouts: StageTimeouts,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            spec_path: PathBuf::new(),
            target_subsystem: String::new(),
            quality_threshold: 0.80,
            max_iterations: 3,
            warning_budget: 1.00,
            max_budget: 5.00,
            pre_review: false,
            output_dir: PathBuf::from("OUTPUT"),
            quality_weights: QualityWeights::default(),
            stage_timeouts: StageTimeouts::default(),
        }
    }
}

/// Price for one model: dollars per 1000 tokens, input and output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Per-model cost and energy coefficients.
///
/// Coefficients are deployment calibration data; the built-in defaults
/// cover the models the rule-based client reports plus a catch-all rate
/// for anything the table does not name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRates {
    pub prices: BTreeMap<String, ModelPrice>,
    /// Watt-hours per 1000 tokens (input + output combined).
    pub energy_wh_per_1k: BTreeMap<String, f64>,
    /// Datacenter overhead multiplier applied to every energy estimate.
    pub overhead_factor: f64,
    /// Fallback price for models missing from `prices`.
    pub default_price: ModelPrice,
    /// Fallback coefficient for models missing from `energy_wh_per_1k`.
    pub default_energy_wh_per_1k: f64,
}

impl Default for ModelRates {
    fn default() -> Self {
        let mut prices = BTreeMap::new();
        prices.insert(
            "analyst-large".to_string(),
            ModelPrice {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        );
        prices.insert(
            "analyst-small".to_string(),
            ModelPrice {
                input_per_1k: 0.0008,
                output_per_1k: 0.004,
            },
        );
        prices.insert(
            "offline".to_string(),
            ModelPrice {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            },
        );

        let mut energy = BTreeMap::new();
        energy.insert("analyst-large".to_string(), 0.30);
        energy.insert("analyst-small".to_string(), 0.04);
        energy.insert("offline".to_string(), 0.0);

        Self {
            prices,
            energy_wh_per_1k: energy,
            overhead_factor: 1.10,
            default_price: ModelPrice {
                input_per_1k: 0.002,
                output_per_1k: 0.010,
            },
            default_energy_wh_per_1k: 0.20,
        }
    }
}

impl ModelRates {
    /// Load rates from a YAML file. Missing keys fall back to defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rates file: {}", path.display()))?;
        let rates: ModelRates = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse rates YAML from: {}", path.display()))?;
        Ok(rates)
    }

    pub fn price_for(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.default_price)
    }

    pub fn energy_for(&self, model: &str) -> f64 {
        self.energy_wh_per_1k
            .get(model)
            .copied()
            .unwrap_or(self.default_energy_wh_per_1k)
    }
}
