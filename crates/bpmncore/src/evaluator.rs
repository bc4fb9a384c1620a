use crate::{EvalError, Variables};
use tokio::sync::oneshot;

/// Evaluates flow conditions and runs inline scripts against the process variables.
///
/// Implementations are invoked while the execution's state is locked, so they
/// must not block. A script that needs to wait on something else can move its
/// [`Continuation`] elsewhere and fire it later; the branch stays suspended
/// until it does.
pub trait ExpressionEvaluator: Send + Sync {
    /// Language identifier used to look the evaluator up (e.g. a script format).
    fn language(&self) -> &str;

    /// Additional names this evaluator answers to.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Check that a condition or script compiles. Called once at start.
    fn validate(&self, _source: &str) -> Result<(), EvalError> {
        Ok(())
    }

    /// Evaluate a condition. Conditions only read the variables.
    fn evaluate_condition(&self, source: &str, variables: &Variables) -> Result<bool, EvalError>;

    /// Run a script body. The script signals completion through `next`.
    fn run_script(
        &self,
        source: &str,
        variables: &mut Variables,
        next: Continuation,
    ) -> Result<(), EvalError>;
}

/// Completion handle for a running script.
///
/// Firing it resumes the suspended branch; dropping it without firing leaves
/// the branch stuck.
#[derive(Debug)]
pub struct Continuation {
    sender: Option<oneshot::Sender<()>>,
}

impl Continuation {
    pub fn new(sender: oneshot::Sender<()>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Create a continuation together with the receiver the branch waits on.
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    /// Signal that the script is done.
    pub fn next(mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn continuation_fires_once() {
        let (next, rx) = Continuation::channel();
        next.next();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_continuation_closes_channel() {
        let (next, rx) = Continuation::channel();
        drop(next);
        assert!(rx.await.is_err());
    }
}
