//! Plugin construction: closure-backed components, factories and the
//! built-in plugins.

pub mod adapter;
pub mod echo;
pub mod manager;

pub use adapter::FnComponent;
pub use manager::{PluginFactory, PluginManager};
