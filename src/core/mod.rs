//! Core functionality: document model, document store, background tasks, and configuration

pub mod config;
pub mod document;
pub mod store;
pub mod sync;
pub mod tasks;
