//! Core weft library (kernel, scheduler, orchestrator, tools, config).

pub mod config;
pub mod core;
pub mod logging;
pub mod memory;
pub mod providers;
pub mod tools;
