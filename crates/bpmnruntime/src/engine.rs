use crate::execution::Execution;
use crate::graph::ProcessGraph;
use crate::listener::ActivityListener;
use crate::registry::EvaluatorRegistry;
use crate::validate;
use bpmncore::{Definition, DefinitionError, EngineError, NodeKind, Variables};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each execution's event channel.
    pub event_buffer_size: usize,
    /// Evaluator language used for flow conditions. Defaults to the first
    /// evaluator registered.
    pub condition_language: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            condition_language: None,
        }
    }
}

/// Entry point for running a process definition.
///
/// The definition is indexed and validated once, on the first call that
/// creates an execution; later executions share the same graph.
pub struct Engine {
    source: Result<Arc<Definition>, DefinitionError>,
    registry: Arc<EvaluatorRegistry>,
    config: EngineConfig,
    graph: OnceLock<Arc<ProcessGraph>>,
}

impl Engine {
    /// Create an engine with an empty evaluator registry and default settings
    pub fn new(definition: Definition) -> Self {
        Self::with_registry(
            definition,
            Arc::new(EvaluatorRegistry::new()),
            EngineConfig::default(),
        )
    }

    /// Create an engine with a pre-configured registry
    pub fn with_registry(
        definition: Definition,
        registry: Arc<EvaluatorRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self::from_source(Ok(Arc::new(definition)), registry, config)
    }

    /// Create an engine from a JSON definition.
    ///
    /// A malformed source is not rejected here; it surfaces as a definition
    /// error when the first execution is created.
    pub fn from_json(source: &str, registry: Arc<EvaluatorRegistry>, config: EngineConfig) -> Self {
        let parsed = Definition::from_json(source).map(Arc::new);
        if let Err(e) = &parsed {
            tracing::debug!("definition source rejected: {}", e);
        }
        Self::from_source(parsed, registry, config)
    }

    /// Read a JSON definition from disk.
    pub fn from_file(
        path: impl AsRef<Path>,
        registry: Arc<EvaluatorRegistry>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        tracing::info!("Loading definition from {}", path.display());
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&source, registry, config))
    }

    fn from_source(
        source: Result<Arc<Definition>, DefinitionError>,
        mut registry: Arc<EvaluatorRegistry>,
        config: EngineConfig,
    ) -> Self {
        if let Some(language) = &config.condition_language {
            Arc::make_mut(&mut registry).set_condition_language(language.as_str());
        }
        Self {
            source,
            registry,
            config,
            graph: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definition(&self) -> Option<&Arc<Definition>> {
        self.source.as_ref().ok()
    }

    /// Id of the process this engine runs.
    pub fn entry_point_id(&self) -> Option<&str> {
        self.definition().map(|d| d.id.as_str())
    }

    /// Id of the node the first token is placed on.
    pub fn entry_node_id(&self) -> Option<&str> {
        self.definition()?
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::StartEvent)
            .map(|n| n.id.as_str())
    }

    /// Index and validate the definition without running it.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.prepare().map(|_| ())
    }

    fn prepare(&self) -> Result<Arc<ProcessGraph>, EngineError> {
        if let Some(graph) = self.graph.get() {
            return Ok(Arc::clone(graph));
        }

        let definition = self.source.clone()?;
        let graph = ProcessGraph::build(definition)?;
        validate::validate(&graph, &self.registry)?;
        tracing::debug!(
            process = %graph.process_id(),
            nodes = graph.node_count(),
            "definition validated"
        );

        let graph = Arc::new(graph);
        Ok(Arc::clone(self.graph.get_or_init(|| graph)))
    }

    /// Build a validated execution in the `Created` state.
    pub fn create_execution(
        &self,
        variables: Variables,
        listener: Option<Arc<dyn ActivityListener>>,
    ) -> Result<Execution, EngineError> {
        let graph = self.prepare()?;
        Ok(Execution::new(
            graph,
            Arc::clone(&self.registry),
            listener,
            variables,
            self.config.event_buffer_size,
        ))
    }

    /// Create an execution and start it.
    pub fn start_instance(
        &self,
        variables: Variables,
        listener: Option<Arc<dyn ActivityListener>>,
    ) -> Result<Execution, EngineError> {
        let execution = self.create_execution(variables, listener)?;
        execution.start()?;
        Ok(execution)
    }
}
