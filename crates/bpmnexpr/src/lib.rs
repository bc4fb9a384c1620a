//! Reference expression evaluator
//!
//! A small sandboxed language for flow conditions and script tasks. Only the
//! process variables are reachable; the sole callable is the continuation
//! (`next()` / `done()`).

mod interpreter;
mod lexer;
mod parser;

pub use interpreter::Completion;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{AssignOp, BinaryOp, Expr, Parser, Stmt, UnaryOp, MAX_DEPTH};

use bpmncore::{Continuation, EvalError, ExpressionEvaluator, Variables};

pub const LANGUAGE: &str = "expression";

/// Evaluator for the `expression` language, also registered as `javascript`
/// and `js` so definitions authored for script engines keep working.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptEvaluator;

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for ScriptEvaluator {
    fn language(&self) -> &str {
        LANGUAGE
    }

    fn aliases(&self) -> &[&str] {
        &["javascript", "js"]
    }

    fn validate(&self, source: &str) -> Result<(), EvalError> {
        Parser::parse_script(source).map(|_| ())
    }

    fn evaluate_condition(&self, source: &str, variables: &Variables) -> Result<bool, EvalError> {
        let expr = Parser::parse_expression(source)?;
        let result = interpreter::evaluate(&expr, variables)?.is_truthy();
        tracing::trace!(condition = %source, result, "condition evaluated");
        Ok(result)
    }

    /// Statements run against a scratch copy that is committed only if the
    /// whole script succeeds.
    fn run_script(
        &self,
        source: &str,
        variables: &mut Variables,
        next: Continuation,
    ) -> Result<(), EvalError> {
        let statements = Parser::parse_script(source)?;
        let mut scratch = variables.clone();
        let completion = interpreter::execute(&statements, &mut scratch)?;
        *variables = scratch;

        match completion {
            Completion::Continue => next.next(),
            Completion::Suspended => {
                tracing::debug!("script finished without calling next()");
            }
        }
        Ok(())
    }
}
