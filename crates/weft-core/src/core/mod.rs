//! Core module: kernel runtime and orchestration.
//!
//! This module contains:
//! - `tcb`: Task control block model
//! - `kernel`: Reasoning kernel and shared kernel state
//! - `scheduler`: Priority ordering and sync pulses
//! - `orchestrator`: End-to-end task loop
//! - `events`: Task event types and the tool output envelope

pub mod events;
pub mod kernel;
pub mod orchestrator;
pub mod scheduler;
pub mod tcb;
