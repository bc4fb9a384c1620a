use crate::graph::ProcessGraph;
use crate::registry::EvaluatorRegistry;
use bpmncore::{NodeKind, ValidationError};

/// Deploy-time checks over the whole definition, run before any token moves.
pub fn validate(graph: &ProcessGraph, registry: &EvaluatorRegistry) -> Result<(), ValidationError> {
    for node in 0..graph.node_count() {
        if graph.node(node).kind == NodeKind::ExclusiveGateway {
            validate_exclusive(graph, node)?;
        }
    }
    validate_expressions(graph, registry)
}

/// An exclusive gateway may leave at most one outgoing flow unconditioned, and
/// a sole outgoing flow must not carry a condition.
fn validate_exclusive(graph: &ProcessGraph, node: usize) -> Result<(), ValidationError> {
    let spec = graph.node(node);
    let outgoing = graph.outgoing(node);

    if let [only] = outgoing {
        let flow = graph.flow(*only);
        let is_default = spec.default_flow.as_deref() == Some(flow.id.as_str());
        if flow.is_conditional() && !is_default {
            return Err(ValidationError::ConditionalSoleFlow {
                gateway: spec.id.clone(),
                flow: flow.id.clone(),
            });
        }
        return Ok(());
    }

    let unconditioned: Vec<String> = outgoing
        .iter()
        .map(|f| graph.flow(*f))
        .filter(|f| !f.is_conditional())
        .map(|f| f.id.clone())
        .collect();
    if unconditioned.len() > 1 {
        return Err(ValidationError::AmbiguousExclusiveGateway {
            gateway: spec.id.clone(),
            flows: unconditioned,
        });
    }
    Ok(())
}

/// Every condition and script must compile under the evaluator that will run it.
fn validate_expressions(
    graph: &ProcessGraph,
    registry: &EvaluatorRegistry,
) -> Result<(), ValidationError> {
    let definition = graph.definition();

    let conditions = definition
        .flows
        .iter()
        .filter_map(|f| f.condition.as_deref().map(|c| (f, c)));
    for (flow, condition) in conditions {
        if !consults_conditions(graph, &flow.source) {
            continue;
        }
        let evaluator = registry
            .condition_evaluator()
            .ok_or_else(|| ValidationError::MissingConditionEvaluator(flow.id.clone()))?;
        evaluator
            .validate(condition)
            .map_err(|source| ValidationError::InvalidExpression {
                element: flow.id.clone(),
                source,
            })?;
    }

    for node in &definition.nodes {
        let Some(script) = &node.script else {
            continue;
        };
        let evaluator =
            registry
                .get(&script.format)
                .ok_or_else(|| ValidationError::UnknownScriptFormat {
                    node: node.id.clone(),
                    format: script.format.clone(),
                })?;
        evaluator
            .validate(&script.body)
            .map_err(|source| ValidationError::InvalidExpression {
                element: node.id.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Conditions are only evaluated on flows leaving exclusive or inclusive gateways.
fn consults_conditions(graph: &ProcessGraph, source: &str) -> bool {
    graph
        .node_position(source)
        .map(|pos| {
            matches!(
                graph.node(pos).kind,
                NodeKind::ExclusiveGateway | NodeKind::InclusiveGateway
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmncore::{Continuation, Definition, EvalError, ExpressionEvaluator, NodeSpec, Variables};
    use std::sync::Arc;

    struct Strict;

    impl ExpressionEvaluator for Strict {
        fn language(&self) -> &str {
            "strict"
        }

        fn validate(&self, source: &str) -> Result<(), EvalError> {
            if source.contains("??") {
                return Err(EvalError::Syntax {
                    col: 1,
                    message: "bad".to_string(),
                });
            }
            Ok(())
        }

        fn evaluate_condition(&self, _: &str, _: &Variables) -> Result<bool, EvalError> {
            Ok(true)
        }

        fn run_script(&self, _: &str, _: &mut Variables, next: Continuation) -> Result<(), EvalError> {
            next.next();
            Ok(())
        }
    }

    fn registry() -> EvaluatorRegistry {
        let mut registry = EvaluatorRegistry::new();
        registry.register(Arc::new(Strict));
        registry
    }

    fn decision(default: Option<&str>) -> Definition {
        let mut def = Definition::new("theProcess");
        def.add_node(NodeSpec::start("theStart"));
        let mut gw = NodeSpec::new("decision", NodeKind::ExclusiveGateway);
        if let Some(flow) = default {
            gw = gw.with_default(flow);
        }
        def.add_node(gw);
        def.add_node(NodeSpec::end("end1"));
        def.add_node(NodeSpec::end("end2"));
        def.connect("flow1", "theStart", "decision");
        def
    }

    fn check(def: Definition) -> Result<(), ValidationError> {
        let graph = ProcessGraph::build(Arc::new(def)).unwrap();
        validate(&graph, &registry())
    }

    #[test]
    fn single_unconditioned_flow_is_valid() {
        let mut def = decision(None);
        def.connect("flow2", "decision", "end1");
        assert!(check(def).is_ok());
    }

    #[test]
    fn single_conditioned_flow_is_invalid() {
        let mut def = decision(None);
        def.connect_when("flow2", "decision", "end1", "this.input <= 50");
        assert!(matches!(
            check(def),
            Err(ValidationError::ConditionalSoleFlow { .. })
        ));
    }

    #[test]
    fn two_unconditioned_flows_are_invalid_even_with_a_default() {
        let mut def = decision(None);
        def.connect("flow2", "decision", "end1");
        def.connect("flow3", "decision", "end2");
        assert!(matches!(
            check(def),
            Err(ValidationError::AmbiguousExclusiveGateway { ref flows, .. }) if flows.len() == 2
        ));

        let mut def = decision(Some("flow2"));
        def.connect("flow2", "decision", "end1");
        def.connect("flow3", "decision", "end2");
        assert!(check(def).is_err());
    }

    #[test]
    fn default_plus_conditioned_flow_is_valid() {
        let mut def = decision(Some("flow2"));
        def.connect("flow2", "decision", "end1");
        def.connect_when("flow3", "decision", "end2", "this.input <= 50");
        assert!(check(def).is_ok());
    }

    #[test]
    fn uncompilable_condition_is_reported() {
        let mut def = decision(Some("flow2"));
        def.connect("flow2", "decision", "end1");
        def.connect_when("flow3", "decision", "end2", "input ?? 1");
        assert!(matches!(
            check(def),
            Err(ValidationError::InvalidExpression { ref element, .. }) if element == "flow3"
        ));
    }

    #[test]
    fn unknown_script_format_is_reported() {
        let mut def = decision(None);
        def.add_node(NodeSpec::script_task("script", "cobol", "MOVE 1 TO X"));
        def.connect("flow2", "decision", "script");
        assert!(matches!(
            check(def),
            Err(ValidationError::UnknownScriptFormat { ref format, .. }) if format == "cobol"
        ));
    }

    #[test]
    fn conditions_without_an_evaluator_are_rejected() {
        let mut def = decision(Some("flow2"));
        def.connect("flow2", "decision", "end1");
        def.connect_when("flow3", "decision", "end2", "x");
        let graph = ProcessGraph::build(Arc::new(def)).unwrap();
        assert!(matches!(
            validate(&graph, &EvaluatorRegistry::new()),
            Err(ValidationError::MissingConditionEvaluator(_))
        ));
    }
}
