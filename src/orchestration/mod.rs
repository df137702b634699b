//! Lifecycle orchestration layer
//!
//! This module drives registered components through initialization, waiting
//! and shutdown, and packages whole-container runs on top of batch calls.

pub mod lifecycle;
pub mod report;
pub mod runner;

pub use lifecycle::ComponentLifecycle;
pub use report::{BatchReport, ComponentOutcome, StepOutcome};
