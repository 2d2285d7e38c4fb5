//! Core domain models for task scheduling.
//!
//! This module contains the task data model, the arena-backed task graph,
//! graph construction from specifications, and the cycle gate that every
//! graph passes before it can be sequenced or executed.

pub mod builder;
pub mod cycle;
pub mod dag;
pub mod task;

pub use builder::{build_dag, GraphBuilder};
pub use cycle::CycleDetector;
pub use dag::TaskGraph;
pub use task::{AgentType, Task, TaskId, TaskSpec, TaskStatus};
