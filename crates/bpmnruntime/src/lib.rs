//! Process execution runtime
//!
//! This crate runs BPMN-style process definitions: it indexes the definition
//! into a graph, validates it, and moves tokens through it as tokio tasks,
//! resolving gateways and synchronising joins along the way.

mod activity;
mod engine;
mod execution;
pub mod gateway;
mod graph;
mod join;
mod listener;
mod registry;
mod validate;

pub use activity::{Activity, ActivityState, ChildActivity};
pub use engine::{Engine, EngineConfig};
pub use execution::{Execution, ExecutionOutcome, ExecutionStatus};
pub use graph::{JoinKind, ProcessGraph};
pub use join::JoinCoordinator;
pub use listener::{ActivityHandler, ActivityListener, Listener};
pub use registry::EvaluatorRegistry;
pub use validate::validate;
