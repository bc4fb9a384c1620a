//! Core abstractions for the process engine
//!
//! This crate provides the definition model, the value type, the error
//! taxonomy, the expression evaluator boundary and the execution events that
//! every other crate depends on.

mod definition;
mod error;
mod evaluator;
pub mod events;
mod value;

pub use definition::{Definition, FlowId, FlowSpec, NodeId, NodeKind, NodeSpec, ScriptSpec};
pub use error::{
    DefinitionError, EngineError, EvalError, ResolutionError, ValidationError,
};
pub use evaluator::{Continuation, ExpressionEvaluator};
pub use events::*;
pub use value::{Value, Variables};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
