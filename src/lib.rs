/// StatWatch - host and process-group resource sampler
///
/// Samples cumulative CPU, memory, network and disk counters at a fixed
/// tick, turns consecutive snapshots into per-tick rates, rolls those into
/// per-window summaries and compares each summary with a reference file
/// written by an external agent for the same window.
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod delta;
pub mod formatting;
pub mod internal_metrics;
pub mod outputs;
pub mod pipeline;
pub mod platform;
pub mod process;
pub mod reference;
pub mod sampler;
pub mod task_manager;
pub mod utils;
pub mod window;

// Re-export core types for convenience
pub use core::*;
