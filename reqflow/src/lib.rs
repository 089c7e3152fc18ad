// Run configuration and model rate tables
pub mod config;

// The workflow execution engine (state machine)
pub mod engine;

// Stage-boundary error taxonomy
pub mod error;

// LLM stage-client seam and shipped clients
pub mod llm;

// Cost/energy/timing accumulators
pub mod metrics;

// Document parsing seam
pub mod parser;

// The run record threaded through every stage
pub mod record;

// Final report rendering
pub mod report;

// Human review gate
pub mod review;

// Post-validation routing
pub mod router;

// Pipeline stages
pub mod stages;

// Checkpoint and history persistence
pub mod store;
