use crate::activity::{Activity, ActivityInstance, ActivityState, ChildActivity, SignalLatch};
use crate::gateway::{self, Divergence};
use crate::graph::{JoinKind, ProcessGraph};
use crate::join::JoinCoordinator;
use crate::listener::ActivityListener;
use crate::registry::EvaluatorRegistry;
use bpmncore::{
    Continuation, EngineError, EventBus, ExecutionEvent, ExecutionId, FlowSpec, Variables,
};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a process run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Running,
    Ended,
    Errored,
    /// Torn down by the caller before reaching a terminal state.
    Discarded,
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Ended { process_id: String },
    Errored { activity_id: String, error: String },
    Discarded,
}

type TokenId = u64;

/// How a token reached the node it is about to process.
#[derive(Debug, Clone, Copy)]
enum Arrival {
    Entry,
    Flow(usize),
    /// Carries a synchronising join forward after it was satisfied elsewhere.
    Released,
}

struct ExecutionState {
    status: ExecutionStatus,
    variables: Variables,
    paths: Vec<String>,
    children: HashMap<String, ActivityInstance>,
    joins: JoinCoordinator,
    /// Live tokens and the node each one sits at.
    tokens: HashMap<TokenId, usize>,
    next_token: TokenId,
}

impl ExecutionState {
    fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Positions of live tokens not parked at `node`.
    fn positions_except(&self, node: usize) -> Vec<usize> {
        self.tokens.values().copied().filter(|pos| *pos != node).collect()
    }
}

struct Entered {
    activity: Activity,
    resume: Option<oneshot::Receiver<()>>,
}

struct ExecutionInner {
    id: ExecutionId,
    graph: Arc<ProcessGraph>,
    registry: Arc<EvaluatorRegistry>,
    listener: Option<Arc<dyn ActivityListener>>,
    state: Mutex<ExecutionState>,
    events: EventBus,
    outcome: watch::Sender<Option<ExecutionOutcome>>,
    cancellation: CancellationToken,
}

/// Discards the run once the last [`Execution`] handle is dropped.
///
/// Token tasks only hold the inner state, so a suspended branch cannot keep
/// the run alive on its own.
struct Teardown(Arc<ExecutionInner>);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.discard();
    }
}

/// One run of a process definition.
///
/// Cheap to clone; every clone refers to the same run. Dropping the last clone
/// discards a run that has not finished.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecutionInner>,
    _teardown: Arc<Teardown>,
}

impl Execution {
    pub(crate) fn new(
        graph: Arc<ProcessGraph>,
        registry: Arc<EvaluatorRegistry>,
        listener: Option<Arc<dyn ActivityListener>>,
        variables: Variables,
        event_buffer_size: usize,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        let inner = ExecutionInner {
            id: ExecutionId::new_v4(),
            graph,
            registry,
            listener,
            state: Mutex::new(ExecutionState {
                status: ExecutionStatus::Created,
                variables,
                paths: Vec::new(),
                children: HashMap::new(),
                joins: JoinCoordinator::new(),
                tokens: HashMap::new(),
                next_token: 0,
            }),
            events: EventBus::new(event_buffer_size),
            outcome,
            cancellation: CancellationToken::new(),
        };
        let inner = Arc::new(inner);
        Self {
            _teardown: Arc::new(Teardown(Arc::clone(&inner))),
            inner,
        }
    }

    /// Move the run to `Running` and place the first token on the entry node.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.status != ExecutionStatus::Created {
            return Err(EngineError::AlreadyStarted(self.inner.id));
        }
        state.status = ExecutionStatus::Running;

        tracing::info!(
            execution = %self.inner.id,
            process = %self.inner.graph.process_id(),
            "Starting process execution"
        );
        self.inner.events.emit(ExecutionEvent::Started {
            execution_id: self.inner.id,
            process_id: self.inner.graph.process_id().to_string(),
            timestamp: Utc::now(),
        });

        let entry = self.inner.graph.entry();
        self.inner.spawn_token(state, entry, Arrival::Entry);
        Ok(())
    }

    pub fn id(&self) -> ExecutionId {
        self.inner.id
    }

    pub fn process_id(&self) -> &str {
        self.inner.graph.process_id()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.inner.state.lock().status
    }

    pub fn is_ended(&self) -> bool {
        self.status() == ExecutionStatus::Ended
    }

    /// Flow ids taken so far, in the order they were first taken.
    pub fn paths(&self) -> Vec<String> {
        self.inner.state.lock().paths.clone()
    }

    /// Every node entered so far.
    pub fn children(&self) -> BTreeMap<String, ChildActivity> {
        self.inner
            .state
            .lock()
            .children
            .iter()
            .map(|(id, instance)| (id.clone(), instance.snapshot(id)))
            .collect()
    }

    /// Snapshot of a child activity, or an inert not-taken stub for a node
    /// that was never entered. Never enters the node.
    pub fn get_child_activity_by_id(&self, id: &str) -> ChildActivity {
        self.inner
            .state
            .lock()
            .children
            .get(id)
            .map(|instance| instance.snapshot(id))
            .unwrap_or_else(|| ChildActivity::not_taken(id))
    }

    /// Current variables.
    pub fn variables(&self) -> Variables {
        self.inner.state.lock().variables.clone()
    }

    pub fn live_tokens(&self) -> usize {
        self.inner.state.lock().tokens.len()
    }

    /// Resume a waiting instance of `node_id`.
    ///
    /// When several entries of the node are suspended, the most recent one is
    /// resumed. Returns false when nothing was waiting.
    pub fn signal(&self, node_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let resumed = state
            .children
            .get_mut(node_id)
            .map(|instance| instance.signal_latest())
            .unwrap_or(false);
        if resumed {
            tracing::debug!(execution = %self.inner.id, activity = %node_id, "signalled");
        } else {
            tracing::warn!(execution = %self.inner.id, activity = %node_id, "no waiting activity to signal");
        }
        resumed
    }

    /// Subscribe to this run's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.inner.events.subscribe()
    }

    /// Terminal outcome, if the run has reached one.
    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Wait until the run ends, errors or is discarded.
    pub async fn wait(&self) -> ExecutionOutcome {
        let mut rx = self.inner.outcome.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return ExecutionOutcome::Discarded;
            }
        }
    }

    /// Tear the run down, cancelling every suspended branch.
    pub fn discard(&self) {
        self.inner.discard();
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Execution")
            .field("id", &self.inner.id)
            .field("process_id", &self.inner.graph.process_id())
            .field("status", &state.status)
            .field("live_tokens", &state.tokens.len())
            .field("paths", &state.paths)
            .finish()
    }
}

impl ExecutionInner {
    fn spawn_token(self: &Arc<Self>, state: &mut ExecutionState, node: usize, arrival: Arrival) {
        let token = state.next_token;
        state.next_token += 1;
        state.tokens.insert(token, node);
        tracing::debug!(
            execution = %self.id,
            token,
            node = %self.graph.node(node).id,
            live = state.tokens.len(),
            "token spawned"
        );
        tokio::spawn(Arc::clone(self).run_token(token, node, arrival));
    }

    fn run_token(self: Arc<Self>, token: TokenId, node: usize, arrival: Arrival) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.process(node, arrival).await;
            self.retire(token);
        })
    }

    async fn process(self: &Arc<Self>, node: usize, arrival: Arrival) {
        let Some(Entered { activity, resume }) = self.enter(node, arrival) else {
            return;
        };

        if let Some(listener) = &self.listener {
            listener.on_start(&activity).await;
        }

        if !self.execute(node, &activity, resume).await {
            return;
        }

        let Some(selected) = self.complete(node) else {
            return;
        };

        if let Some(listener) = &self.listener {
            listener.on_end(&activity).await;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_running() {
            return;
        }
        for flow in selected {
            self.advance_token(state, flow);
        }
    }

    /// Arrival bookkeeping and the transition into `Entered`.
    ///
    /// Returns `None` when the token is absorbed by a join that is not yet
    /// satisfied, or when the run is no longer running.
    fn enter(&self, node: usize, arrival: Arrival) -> Option<Entered> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_running() {
            return None;
        }
        let spec = self.graph.node(node);

        if let Arrival::Flow(flow) = arrival {
            if let Some(kind) = self.graph.join_kind(node) {
                state.joins.arrive(node, flow);
                let instance = state
                    .children
                    .entry(spec.id.clone())
                    .or_insert_with(|| ActivityInstance::new(spec.kind));
                instance.taken = true;

                let live = state.positions_except(node);
                if !state.joins.try_release(&self.graph, node, kind, &live) {
                    tracing::debug!(
                        execution = %self.id,
                        join = %spec.id,
                        arrivals = state.joins.arrivals(node),
                        "token held at join"
                    );
                    return None;
                }
                tracing::debug!(execution = %self.id, join = %spec.id, "join released");
            }
        }

        let (latch, resume) = if spec.kind.is_wait_state() {
            let (latch, rx) = SignalLatch::new();
            (Some(latch), Some(rx))
        } else {
            (None, None)
        };

        let instance = state
            .children
            .entry(spec.id.clone())
            .or_insert_with(|| ActivityInstance::new(spec.kind));
        instance.taken = true;
        instance.entries += 1;
        instance.state = ActivityState::Entered;
        if let Some(latch) = &latch {
            instance.waits.push(Arc::clone(latch));
        }

        tracing::debug!(execution = %self.id, activity = %spec.id, kind = %spec.kind, "entered");
        self.events.emit(ExecutionEvent::ActivityStarted {
            execution_id: self.id,
            activity_id: spec.id.clone(),
            kind: spec.kind,
            timestamp: Utc::now(),
        });

        Some(Entered {
            activity: Activity::new(spec.id.clone(), spec.kind, self.id, latch),
            resume,
        })
    }

    /// Node-specific behaviour. Returns false if the branch must stop here.
    async fn execute(
        self: &Arc<Self>,
        node: usize,
        activity: &Activity,
        resume: Option<oneshot::Receiver<()>>,
    ) -> bool {
        if !self.transition(node, ActivityState::Executing) {
            return false;
        }

        if let Some(resume) = resume {
            if !self.transition(node, ActivityState::Waiting) {
                return false;
            }
            self.events.emit(ExecutionEvent::ActivityWaiting {
                execution_id: self.id,
                activity_id: activity.id().to_string(),
                timestamp: Utc::now(),
            });
            tracing::debug!(execution = %self.id, activity = %activity.id(), "waiting for signal");

            let resumed = tokio::select! {
                result = resume => result.is_ok(),
                _ = self.cancellation.cancelled() => false,
            };
            self.forget_wait(activity);
            return resumed && self.transition(node, ActivityState::Executing);
        }

        if self.graph.node(node).script.is_some() {
            let Some(done) = self.run_script(node) else {
                return false;
            };
            let finished = tokio::select! {
                result = done => result.is_ok(),
                _ = self.cancellation.cancelled() => return false,
            };
            if !finished {
                tracing::warn!(
                    execution = %self.id,
                    activity = %activity.id(),
                    "script dropped its continuation, branch is stuck"
                );
                self.cancellation.cancelled().await;
                return false;
            }
            return self.state.lock().is_running();
        }

        true
    }

    fn run_script(&self, node: usize) -> Option<oneshot::Receiver<()>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_running() {
            return None;
        }
        let spec = self.graph.node(node);
        let script = spec.script.as_ref()?;

        let Some(evaluator) = self.registry.get(&script.format) else {
            let error = format!("no evaluator registered for script format '{}'", script.format);
            self.fail(state, node, error);
            return None;
        };

        let (next, done) = Continuation::channel();
        match evaluator.run_script(&script.body, &mut state.variables, next) {
            Ok(()) => Some(done),
            Err(e) => {
                self.fail(state, node, e.to_string());
                None
            }
        }
    }

    /// Resolve outgoing flows and mark the node completed.
    fn complete(&self, node: usize) -> Option<Vec<usize>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.is_running() {
            return None;
        }
        let spec = self.graph.node(node);
        let outgoing = self.graph.outgoing(node);
        let flows: Vec<&FlowSpec> = outgoing.iter().map(|f| self.graph.flow(*f)).collect();
        let divergence = Divergence {
            node_id: &spec.id,
            kind: spec.kind,
            flows: &flows,
            default_flow: spec.default_flow.as_deref(),
        };
        let evaluator = self.registry.condition_evaluator();

        match gateway::select_flows(&divergence, evaluator.as_deref(), &state.variables) {
            Ok(selected) => {
                if let Some(instance) = state.children.get_mut(&spec.id) {
                    instance.state = ActivityState::Completed;
                }
                tracing::debug!(
                    execution = %self.id,
                    activity = %spec.id,
                    selected = selected.len(),
                    "completed"
                );
                self.events.emit(ExecutionEvent::ActivityEnded {
                    execution_id: self.id,
                    activity_id: spec.id.clone(),
                    timestamp: Utc::now(),
                });
                Some(selected.into_iter().map(|pos| outgoing[pos]).collect())
            }
            Err(e) => {
                self.fail(state, node, e.to_string());
                None
            }
        }
    }

    fn advance_token(self: &Arc<Self>, state: &mut ExecutionState, flow: usize) {
        let spec = self.graph.flow(flow);
        if !state.paths.contains(&spec.id) {
            state.paths.push(spec.id.clone());
        }
        self.events.emit(ExecutionEvent::FlowTaken {
            execution_id: self.id,
            flow_id: spec.id.clone(),
            source: spec.source.clone(),
            target: spec.target.clone(),
            timestamp: Utc::now(),
        });
        let target = self.graph.flow_target(flow);
        self.spawn_token(state, target, Arrival::Flow(flow));
    }

    /// Remove a finished token; release inclusive joins it was blocking and
    /// detect the end of the run.
    fn retire(self: &Arc<Self>, token: TokenId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tokens.remove(&token);
        if !state.is_running() {
            return;
        }

        for node in state.joins.pending() {
            if self.graph.join_kind(node) != Some(JoinKind::Inclusive) {
                continue;
            }
            let live = state.positions_except(node);
            if state.joins.try_release(&self.graph, node, JoinKind::Inclusive, &live) {
                tracing::debug!(
                    execution = %self.id,
                    join = %self.graph.node(node).id,
                    "join released after branch retired"
                );
                self.spawn_token(state, node, Arrival::Released);
            }
        }

        if state.tokens.is_empty() && !state.children.values().any(|c| c.is_waiting()) {
            let stranded: Vec<&str> = state
                .joins
                .pending()
                .into_iter()
                .map(|n| self.graph.node(n).id.as_str())
                .collect();
            if !stranded.is_empty() {
                tracing::warn!(execution = %self.id, joins = ?stranded, "run ended with unsatisfied joins");
            }
            state.status = ExecutionStatus::Ended;
            tracing::info!(
                execution = %self.id,
                process = %self.graph.process_id(),
                flows = state.paths.len(),
                "Process execution ended"
            );
            self.events.emit(ExecutionEvent::Ended {
                execution_id: self.id,
                process_id: self.graph.process_id().to_string(),
                timestamp: Utc::now(),
            });
            self.outcome.send_replace(Some(ExecutionOutcome::Ended {
                process_id: self.graph.process_id().to_string(),
            }));
        }
    }

    fn transition(&self, node: usize, to: ActivityState) -> bool {
        let mut state = self.state.lock();
        if !state.is_running() {
            return false;
        }
        if let Some(instance) = state.children.get_mut(&self.graph.node(node).id) {
            instance.state = to;
        }
        true
    }

    fn discard(&self) {
        let mut state = self.state.lock();
        if matches!(
            state.status,
            ExecutionStatus::Created | ExecutionStatus::Running
        ) {
            state.status = ExecutionStatus::Discarded;
            tracing::info!(execution = %self.id, "execution discarded");
            self.outcome.send_replace(Some(ExecutionOutcome::Discarded));
        }
        drop(state);
        self.cancellation.cancel();
    }

    fn forget_wait(&self, activity: &Activity) {
        let mut state = self.state.lock();
        if let Some(instance) = state.children.get_mut(activity.id()) {
            instance.prune();
        }
    }

    /// Halt the run in `Errored`. Only the first failure is reported.
    fn fail(&self, state: &mut ExecutionState, node: usize, error: String) {
        if !state.is_running() {
            return;
        }
        let activity_id = self.graph.node(node).id.clone();
        state.status = ExecutionStatus::Errored;
        if let Some(instance) = state.children.get_mut(&activity_id) {
            instance.state = ActivityState::Errored;
        }

        tracing::error!(execution = %self.id, activity = %activity_id, "{}", error);
        self.events.emit(ExecutionEvent::Failed {
            execution_id: self.id,
            activity_id: activity_id.clone(),
            error: error.clone(),
            timestamp: Utc::now(),
        });
        self.outcome
            .send_replace(Some(ExecutionOutcome::Errored { activity_id, error }));
        self.cancellation.cancel();
    }
}
