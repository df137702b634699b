//! This module contains the core logic of the componix orchestrator.
//!
//! It defines the component container, the lifecycle orchestration layer, the
//! lifecycle event bus, and the configuration and logging it runs with.

pub mod config;
pub mod core;
pub mod event;
pub mod logging;
pub mod orchestration;
pub mod plugin;
