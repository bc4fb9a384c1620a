//! Outgoing flow selection.
//!
//! Every resolver receives the node's outgoing flows in declared order and
//! returns positions into that slice. Only the exclusive and inclusive
//! resolvers consult conditions, and they do so strictly in order.

use bpmncore::{ExpressionEvaluator, FlowSpec, NodeKind, ResolutionError, Variables};

/// Everything a resolver needs to know about the diverging node.
pub struct Divergence<'a> {
    pub node_id: &'a str,
    pub kind: NodeKind,
    pub flows: &'a [&'a FlowSpec],
    pub default_flow: Option<&'a str>,
}

impl<'a> Divergence<'a> {
    fn is_default(&self, flow: &FlowSpec) -> bool {
        self.default_flow == Some(flow.id.as_str())
    }

    fn default_position(&self) -> Option<usize> {
        self.flows.iter().position(|f| self.is_default(f))
    }
}

/// Select the flows a completed node sends tokens along.
pub fn select_flows(
    divergence: &Divergence<'_>,
    evaluator: Option<&dyn ExpressionEvaluator>,
    variables: &Variables,
) -> Result<Vec<usize>, ResolutionError> {
    if divergence.flows.is_empty() {
        return Ok(Vec::new());
    }
    match divergence.kind {
        NodeKind::ExclusiveGateway => exclusive(divergence, evaluator, variables),
        NodeKind::InclusiveGateway => inclusive(divergence, evaluator, variables),
        NodeKind::ParallelGateway => Ok(parallel(divergence)),
        _ => Ok(uncontrolled(divergence)),
    }
}

/// First matching conditioned flow, else the default. A gateway with a
/// single unconditioned outgoing flow simply passes the token along.
pub fn exclusive(
    divergence: &Divergence<'_>,
    evaluator: Option<&dyn ExpressionEvaluator>,
    variables: &Variables,
) -> Result<Vec<usize>, ResolutionError> {
    if let [only] = divergence.flows {
        if only.condition.is_none() {
            return Ok(vec![0]);
        }
    }

    for (pos, flow) in divergence.flows.iter().enumerate() {
        if divergence.is_default(flow) {
            continue;
        }
        if let Some(condition) = &flow.condition {
            if test(flow, condition, evaluator, variables)? {
                return Ok(vec![pos]);
            }
        }
    }

    divergence
        .default_position()
        .map(|pos| vec![pos])
        .ok_or_else(|| ResolutionError::NoFlowSelected {
            gateway: divergence.node_id.to_string(),
        })
}

/// Every flow, conditions ignored.
pub fn parallel(divergence: &Divergence<'_>) -> Vec<usize> {
    (0..divergence.flows.len()).collect()
}

/// Every non-default flow whose condition holds or is absent; the default
/// only when nothing else was selected.
pub fn inclusive(
    divergence: &Divergence<'_>,
    evaluator: Option<&dyn ExpressionEvaluator>,
    variables: &Variables,
) -> Result<Vec<usize>, ResolutionError> {
    let mut selected = Vec::new();
    for (pos, flow) in divergence.flows.iter().enumerate() {
        if divergence.is_default(flow) {
            continue;
        }
        let take = match &flow.condition {
            Some(condition) => test(flow, condition, evaluator, variables)?,
            None => true,
        };
        if take {
            selected.push(pos);
        }
    }

    if selected.is_empty() {
        let default = divergence
            .default_position()
            .ok_or_else(|| ResolutionError::NoFlowSelected {
                gateway: divergence.node_id.to_string(),
            })?;
        selected.push(default);
    }
    Ok(selected)
}

/// Implicit fork of a non-gateway node: behaves like a parallel split.
pub fn uncontrolled(divergence: &Divergence<'_>) -> Vec<usize> {
    parallel(divergence)
}

fn test(
    flow: &FlowSpec,
    condition: &str,
    evaluator: Option<&dyn ExpressionEvaluator>,
    variables: &Variables,
) -> Result<bool, ResolutionError> {
    let evaluator = evaluator.ok_or_else(|| ResolutionError::Condition {
        flow: flow.id.clone(),
        source: bpmncore::EvalError::Unsupported("no condition evaluator registered".to_string()),
    })?;
    let result = evaluator
        .evaluate_condition(condition, variables)
        .map_err(|source| ResolutionError::Condition {
            flow: flow.id.clone(),
            source,
        })?;
    tracing::trace!(flow = %flow.id, result, "condition evaluated");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmncore::{Continuation, EvalError, Value};

    /// Conditions are variable names; true when the variable is truthy.
    struct Lookup;

    impl ExpressionEvaluator for Lookup {
        fn language(&self) -> &str {
            "lookup"
        }

        fn evaluate_condition(&self, source: &str, variables: &Variables) -> Result<bool, EvalError> {
            if source == "boom" {
                return Err(EvalError::Failed("boom".to_string()));
            }
            Ok(variables.get(source).map(Value::is_truthy).unwrap_or(false))
        }

        fn run_script(&self, _: &str, _: &mut Variables, next: Continuation) -> Result<(), EvalError> {
            next.next();
            Ok(())
        }
    }

    fn flows(specs: &[(&str, Option<&str>)]) -> Vec<FlowSpec> {
        specs
            .iter()
            .map(|(id, cond)| {
                let flow = FlowSpec::new(*id, "gw", format!("to_{}", id));
                match cond {
                    Some(c) => flow.with_condition(*c),
                    None => flow,
                }
            })
            .collect()
    }

    fn vars(names: &[&str]) -> Variables {
        names.iter().map(|n| (n.to_string(), Value::Bool(true))).collect()
    }

    fn run(
        kind: NodeKind,
        specs: &[(&str, Option<&str>)],
        default: Option<&str>,
        truthy: &[&str],
    ) -> Result<Vec<String>, ResolutionError> {
        let owned = flows(specs);
        let refs: Vec<&FlowSpec> = owned.iter().collect();
        let divergence = Divergence {
            node_id: "gw",
            kind,
            flows: &refs,
            default_flow: default,
        };
        let selected = select_flows(&divergence, Some(&Lookup), &vars(truthy))?;
        Ok(selected.into_iter().map(|p| owned[p].id.clone()).collect())
    }

    #[test]
    fn exclusive_first_match_wins() {
        let specs = [("f1", Some("a")), ("f2", Some("b"))];
        assert_eq!(run(NodeKind::ExclusiveGateway, &specs, None, &["a", "b"]).unwrap(), vec!["f1"]);
        assert_eq!(run(NodeKind::ExclusiveGateway, &specs, None, &["b"]).unwrap(), vec!["f2"]);
    }

    #[test]
    fn exclusive_default_only_when_nothing_matches() {
        let specs = [("f1", None), ("f2", Some("a"))];
        assert_eq!(run(NodeKind::ExclusiveGateway, &specs, Some("f1"), &[]).unwrap(), vec!["f1"]);
        assert_eq!(run(NodeKind::ExclusiveGateway, &specs, Some("f1"), &["a"]).unwrap(), vec!["f2"]);
    }

    #[test]
    fn exclusive_single_unconditioned_flow_is_taken() {
        assert_eq!(run(NodeKind::ExclusiveGateway, &[("f1", None)], None, &[]).unwrap(), vec!["f1"]);
    }

    #[test]
    fn exclusive_unconditioned_sibling_is_not_a_default() {
        let specs = [("f1", Some("a")), ("f2", None)];
        assert_eq!(
            run(NodeKind::ExclusiveGateway, &specs, None, &[]),
            Err(ResolutionError::NoFlowSelected { gateway: "gw".to_string() })
        );
        assert_eq!(run(NodeKind::ExclusiveGateway, &specs, None, &["a"]).unwrap(), vec!["f1"]);
    }

    #[test]
    fn exclusive_fails_without_match_or_default() {
        let specs = [("f1", Some("a")), ("f2", Some("b"))];
        assert_eq!(
            run(NodeKind::ExclusiveGateway, &specs, None, &[]),
            Err(ResolutionError::NoFlowSelected { gateway: "gw".to_string() })
        );
    }

    #[test]
    fn parallel_ignores_conditions() {
        let specs = [("f1", Some("a")), ("f2", Some("b"))];
        assert_eq!(run(NodeKind::ParallelGateway, &specs, None, &[]).unwrap(), vec!["f1", "f2"]);
    }

    #[test]
    fn inclusive_takes_unconditioned_and_matching() {
        let specs = [("f1", None), ("f2", Some("a")), ("f3", Some("b"))];
        assert_eq!(
            run(NodeKind::InclusiveGateway, &specs, None, &["a", "b"]).unwrap(),
            vec!["f1", "f2", "f3"]
        );
        assert_eq!(run(NodeKind::InclusiveGateway, &specs, None, &[]).unwrap(), vec!["f1"]);
    }

    #[test]
    fn inclusive_default_is_suppressed_by_a_match() {
        let specs = [("f1", None), ("f2", Some("a")), ("f3", Some("b"))];
        assert_eq!(run(NodeKind::InclusiveGateway, &specs, Some("f1"), &["a"]).unwrap(), vec!["f2"]);
        assert_eq!(run(NodeKind::InclusiveGateway, &specs, Some("f1"), &[]).unwrap(), vec!["f1"]);
    }

    #[test]
    fn inclusive_fails_without_match_or_default() {
        let specs = [("f1", Some("a")), ("f2", Some("b"))];
        assert!(matches!(
            run(NodeKind::InclusiveGateway, &specs, None, &[]),
            Err(ResolutionError::NoFlowSelected { .. })
        ));
    }

    #[test]
    fn implicit_fork_takes_everything() {
        let specs = [("f1", None), ("f2", None), ("f3", Some("never"))];
        assert_eq!(run(NodeKind::StartEvent, &specs, None, &[]).unwrap(), vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn condition_errors_name_the_flow() {
        let specs = [("f1", Some("boom")), ("f2", None)];
        let err = run(NodeKind::ExclusiveGateway, &specs, Some("f2"), &[]).unwrap_err();
        assert!(matches!(err, ResolutionError::Condition { ref flow, .. } if flow == "f1"));
    }

    #[test]
    fn no_outgoing_flows_is_a_terminal_branch() {
        assert!(run(NodeKind::ExclusiveGateway, &[], None, &[]).unwrap().is_empty());
    }
}
