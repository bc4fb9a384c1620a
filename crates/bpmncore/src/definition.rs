use crate::{DefinitionError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type NodeId = String;
pub type FlowId = String;

/// Complete process definition: the immutable node/flow graph handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub flows: Vec<FlowSpec>,
}

impl Definition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Parse a definition from its JSON form.
    pub fn from_json(source: &str) -> Result<Self, DefinitionError> {
        if source.trim().is_empty() {
            return Err(DefinitionError::Parse("empty source".to_string()));
        }
        serde_json::from_str(source).map_err(|e| DefinitionError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Add an unconditioned sequence flow.
    pub fn connect(
        &mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> FlowId {
        self.push_flow(FlowSpec::new(id, source, target))
    }

    /// Add a sequence flow guarded by a condition.
    pub fn connect_when(
        &mut self,
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> FlowId {
        self.push_flow(FlowSpec::new(id, source, target).with_condition(condition))
    }

    fn push_flow(&mut self, flow: FlowSpec) -> FlowId {
        let id = flow.id.clone();
        self.flows.push(flow);
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_flow(&self, id: &str) -> Option<&FlowSpec> {
        self.flows.iter().find(|f| f.id == id)
    }
}

/// A node (activity, event or gateway) in a definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_flow: Option<FlowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptSpec>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            default_flow: None,
            script: None,
            attributes: HashMap::new(),
        }
    }

    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::StartEvent)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::EndEvent)
    }

    pub fn script_task(
        id: impl Into<String>,
        format: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(id, NodeKind::ScriptTask).with_script(format, body)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_default(mut self, flow: impl Into<String>) -> Self {
        self.default_flow = Some(flow.into());
        self
    }

    pub fn with_script(mut self, format: impl Into<String>, body: impl Into<String>) -> Self {
        self.script = Some(ScriptSpec {
            format: format.into(),
            body: body.into(),
        });
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    StartEvent,
    EndEvent,
    IntermediateEvent,
    Task,
    UserTask,
    ReceiveTask,
    ManualTask,
    ScriptTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
}

impl NodeKind {
    pub fn is_gateway(self) -> bool {
        matches!(
            self,
            NodeKind::ExclusiveGateway | NodeKind::ParallelGateway | NodeKind::InclusiveGateway
        )
    }

    /// Tasks that suspend until an external signal.
    pub fn is_wait_state(self) -> bool {
        matches!(
            self,
            NodeKind::UserTask | NodeKind::ReceiveTask | NodeKind::ManualTask
        )
    }

    pub fn is_event(self) -> bool {
        matches!(
            self,
            NodeKind::StartEvent | NodeKind::EndEvent | NodeKind::IntermediateEvent
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::StartEvent => "start_event",
            NodeKind::EndEvent => "end_event",
            NodeKind::IntermediateEvent => "intermediate_event",
            NodeKind::Task => "task",
            NodeKind::UserTask => "user_task",
            NodeKind::ReceiveTask => "receive_task",
            NodeKind::ManualTask => "manual_task",
            NodeKind::ScriptTask => "script_task",
            NodeKind::ExclusiveGateway => "exclusive_gateway",
            NodeKind::ParallelGateway => "parallel_gateway",
            NodeKind::InclusiveGateway => "inclusive_gateway",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inline script attached to a script task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptSpec {
    pub format: String,
    pub body: String,
}

/// Directed sequence flow between two nodes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowSpec {
    pub id: FlowId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl FlowSpec {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}
