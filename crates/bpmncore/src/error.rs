use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Execution {0} was already started")]
    AlreadyStarted(uuid::Uuid),

    #[error("No tokio runtime available to schedule tokens")]
    NoRuntime,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structural problems with a process definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Unable to parse definition: {0}")]
    Parse(String),

    #[error("Definition has no activities")]
    Empty,

    #[error("Definition has no executable entry node (start event)")]
    MissingEntryNode,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Duplicate flow id: {0}")]
    DuplicateFlow(String),

    #[error("Flow '{flow}' references unknown node '{node}'")]
    UnknownNode { flow: String, node: String },

    #[error("Default flow '{flow}' is not an outgoing flow of '{node}'")]
    InvalidDefaultFlow { node: String, flow: String },

    #[error("Script task '{0}' has no script")]
    MissingScript(String),
}

/// Deploy-time rule violations, reported before any token moves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Exclusive gateway '{gateway}' has more than one unconditioned outgoing flow: {flows:?}")]
    AmbiguousExclusiveGateway { gateway: String, flows: Vec<String> },

    #[error("Exclusive gateway '{gateway}' has a single outgoing flow '{flow}' with a condition")]
    ConditionalSoleFlow { gateway: String, flow: String },

    #[error("No evaluator registered for script format '{format}' (node '{node}')")]
    UnknownScriptFormat { node: String, format: String },

    #[error("No evaluator registered for conditions (flow '{0}')")]
    MissingConditionEvaluator(String),

    #[error("Invalid expression in '{element}': {source}")]
    InvalidExpression {
        element: String,
        #[source]
        source: EvalError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Syntax error at column {col}: {message}")]
    Syntax { col: usize, message: String },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Evaluation failed: {0}")]
    Failed(String),
}

/// Runtime gateway failures. Surface as the execution's `error` event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Gateway '{gateway}' selected no outgoing flow and declares no default")]
    NoFlowSelected { gateway: String },

    #[error("Condition on flow '{flow}' failed: {source}")]
    Condition {
        flow: String,
        #[source]
        source: EvalError,
    },
}
