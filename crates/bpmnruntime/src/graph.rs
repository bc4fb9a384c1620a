use bpmncore::{Definition, DefinitionError, FlowSpec, NodeKind, NodeSpec};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;

/// How a node reconciles several incoming tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Wait for every incoming flow.
    Parallel,
    /// Wait for the incoming flows that can still receive a token.
    Inclusive,
}

/// Indexed, validated view of a [`Definition`].
///
/// Nodes and flows are addressed by their position in the definition; the
/// petgraph graph mirrors those positions and is used for reachability.
pub struct ProcessGraph {
    definition: Arc<Definition>,
    graph: DiGraph<usize, usize>,
    node_index: HashMap<String, usize>,
    flow_index: HashMap<String, usize>,
    flow_ends: Vec<(usize, usize)>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    entry: usize,
}

impl ProcessGraph {
    /// Build the index, checking the structural invariants of the definition.
    pub fn build(definition: Arc<Definition>) -> Result<Self, DefinitionError> {
        if definition.nodes.is_empty() {
            return Err(DefinitionError::Empty);
        }

        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.flows.len());
        let mut node_index = HashMap::with_capacity(definition.nodes.len());
        for (pos, node) in definition.nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), pos).is_some() {
                return Err(DefinitionError::DuplicateNode(node.id.clone()));
            }
            graph.add_node(pos);
            if node.kind == NodeKind::ScriptTask && node.script.is_none() {
                return Err(DefinitionError::MissingScript(node.id.clone()));
            }
        }

        let mut flow_index = HashMap::with_capacity(definition.flows.len());
        let mut flow_ends = Vec::with_capacity(definition.flows.len());
        let mut outgoing = vec![Vec::new(); definition.nodes.len()];
        let mut incoming = vec![Vec::new(); definition.nodes.len()];
        for (pos, flow) in definition.flows.iter().enumerate() {
            if flow_index.insert(flow.id.clone(), pos).is_some() {
                return Err(DefinitionError::DuplicateFlow(flow.id.clone()));
            }
            let lookup = |id: &String| {
                node_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| DefinitionError::UnknownNode {
                        flow: flow.id.clone(),
                        node: id.clone(),
                    })
            };
            let source = lookup(&flow.source)?;
            let target = lookup(&flow.target)?;

            graph.add_edge(NodeIndex::new(source), NodeIndex::new(target), pos);
            flow_ends.push((source, target));
            outgoing[source].push(pos);
            incoming[target].push(pos);
        }

        for (pos, node) in definition.nodes.iter().enumerate() {
            if let Some(default) = &node.default_flow {
                let owned = flow_index
                    .get(default)
                    .map(|f| outgoing[pos].contains(f))
                    .unwrap_or(false);
                if !owned {
                    return Err(DefinitionError::InvalidDefaultFlow {
                        node: node.id.clone(),
                        flow: default.clone(),
                    });
                }
            }
        }

        let entry = definition
            .nodes
            .iter()
            .position(|n| n.kind == NodeKind::StartEvent)
            .ok_or(DefinitionError::MissingEntryNode)?;

        tracing::debug!(
            process = %definition.id,
            nodes = definition.nodes.len(),
            flows = definition.flows.len(),
            "indexed process graph"
        );

        Ok(Self {
            definition,
            graph,
            node_index,
            flow_index,
            flow_ends,
            outgoing,
            incoming,
            entry,
        })
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    pub fn process_id(&self) -> &str {
        &self.definition.id
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn node_count(&self) -> usize {
        self.definition.nodes.len()
    }

    pub fn node(&self, pos: usize) -> &NodeSpec {
        &self.definition.nodes[pos]
    }

    pub fn flow(&self, pos: usize) -> &FlowSpec {
        &self.definition.flows[pos]
    }

    pub fn node_position(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn flow_position(&self, id: &str) -> Option<usize> {
        self.flow_index.get(id).copied()
    }

    pub fn flow_source(&self, flow: usize) -> usize {
        self.flow_ends[flow].0
    }

    pub fn flow_target(&self, flow: usize) -> usize {
        self.flow_ends[flow].1
    }

    /// Outgoing flows in declared order.
    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    /// Convergence discipline for a node, `None` meaning broadcast.
    pub fn join_kind(&self, node: usize) -> Option<JoinKind> {
        if self.incoming[node].len() < 2 {
            return None;
        }
        match self.node(node).kind {
            NodeKind::ParallelGateway => Some(JoinKind::Parallel),
            NodeKind::InclusiveGateway => Some(JoinKind::Inclusive),
            _ => None,
        }
    }

    /// Whether a token sitting at `from` could still arrive at `to`.
    pub fn can_reach(&self, from: usize, to: usize) -> bool {
        from == to
            || has_path_connecting(&self.graph, NodeIndex::new(from), NodeIndex::new(to), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmncore::NodeSpec;

    fn fork_join() -> Definition {
        let mut def = Definition::new("theProcess");
        def.add_node(NodeSpec::start("theStart"));
        def.add_node(NodeSpec::new("fork", NodeKind::ParallelGateway));
        def.add_node(NodeSpec::new("join", NodeKind::ParallelGateway));
        def.add_node(NodeSpec::end("end"));
        def.connect("flow1", "theStart", "fork");
        def.connect("flow2", "fork", "join");
        def.connect("flow3", "fork", "join");
        def.connect("flow4", "join", "end");
        def
    }

    #[test]
    fn indexes_adjacency_in_declared_order() {
        let graph = ProcessGraph::build(Arc::new(fork_join())).unwrap();
        let fork = graph.node_position("fork").unwrap();
        let join = graph.node_position("join").unwrap();

        let out: Vec<_> = graph.outgoing(fork).iter().map(|f| graph.flow(*f).id.as_str()).collect();
        assert_eq!(out, vec!["flow2", "flow3"]);
        assert_eq!(graph.incoming(join).len(), 2);
        assert_eq!(graph.join_kind(join), Some(JoinKind::Parallel));
        assert_eq!(graph.join_kind(fork), None);
        assert_eq!(graph.node(graph.entry()).id, "theStart");
    }

    #[test]
    fn reachability_follows_flows() {
        let graph = ProcessGraph::build(Arc::new(fork_join())).unwrap();
        let start = graph.node_position("theStart").unwrap();
        let end = graph.node_position("end").unwrap();
        assert!(graph.can_reach(start, end));
        assert!(!graph.can_reach(end, start));
        assert!(graph.can_reach(end, end));
    }

    #[test]
    fn rejects_structural_errors() {
        let empty = Definition::new("p");
        assert!(matches!(
            ProcessGraph::build(Arc::new(empty)),
            Err(DefinitionError::Empty)
        ));

        let mut no_start = Definition::new("p");
        no_start.add_node(NodeSpec::end("end"));
        assert!(matches!(
            ProcessGraph::build(Arc::new(no_start)),
            Err(DefinitionError::MissingEntryNode)
        ));

        let mut dangling = fork_join();
        dangling.connect("flow5", "join", "nowhere");
        assert!(matches!(
            ProcessGraph::build(Arc::new(dangling)),
            Err(DefinitionError::UnknownNode { .. })
        ));

        let mut bad_default = fork_join();
        bad_default.nodes[1].default_flow = Some("flow4".to_string());
        assert!(matches!(
            ProcessGraph::build(Arc::new(bad_default)),
            Err(DefinitionError::InvalidDefaultFlow { .. })
        ));

        let mut dup = fork_join();
        dup.add_node(NodeSpec::end("end"));
        assert!(matches!(
            ProcessGraph::build(Arc::new(dup)),
            Err(DefinitionError::DuplicateNode(_))
        ));

        let mut scriptless = fork_join();
        scriptless.add_node(NodeSpec::new("script", NodeKind::ScriptTask));
        assert!(matches!(
            ProcessGraph::build(Arc::new(scriptless)),
            Err(DefinitionError::MissingScript(_))
        ));
    }
}
