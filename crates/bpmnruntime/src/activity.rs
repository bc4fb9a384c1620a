use bpmncore::{ExecutionId, NodeKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Lifecycle of an activity instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Pending,
    Entered,
    Executing,
    Waiting,
    Completed,
    Errored,
}

impl ActivityState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivityState::Completed | ActivityState::Errored)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityState::Pending => "pending",
            ActivityState::Entered => "entered",
            ActivityState::Executing => "executing",
            ActivityState::Waiting => "waiting",
            ActivityState::Completed => "completed",
            ActivityState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// One-shot resume signal for a single suspension of a wait-state task.
///
/// Created when the token enters the node, so a signal sent from inside the
/// start notification is latched until the task actually suspends.
#[derive(Debug)]
pub(crate) struct SignalLatch {
    sender: Mutex<Option<oneshot::Sender<()>>>,
}

impl SignalLatch {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let latch = Arc::new(Self {
            sender: Mutex::new(Some(tx)),
        });
        (latch, rx)
    }

    /// Fire the latch. Returns false if it was already fired.
    pub(crate) fn fire(&self) -> bool {
        match self.sender.lock().take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// Per-run bookkeeping for an entered node.
#[derive(Debug)]
pub(crate) struct ActivityInstance {
    pub(crate) kind: NodeKind,
    pub(crate) state: ActivityState,
    pub(crate) taken: bool,
    pub(crate) entries: usize,
    /// Suspensions awaiting a signal, oldest first.
    pub(crate) waits: Vec<Arc<SignalLatch>>,
}

impl ActivityInstance {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            state: ActivityState::Pending,
            taken: false,
            entries: 0,
            waits: Vec::new(),
        }
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waits.iter().any(|w| w.is_pending())
    }

    /// Resume the most recently suspended entry.
    pub(crate) fn signal_latest(&mut self) -> bool {
        self.prune();
        match self.waits.pop() {
            Some(latch) => latch.fire(),
            None => false,
        }
    }

    /// Drop latches that have already fired.
    pub(crate) fn prune(&mut self) {
        self.waits.retain(|w| w.is_pending());
    }

    pub(crate) fn snapshot(&self, id: &str) -> ChildActivity {
        ChildActivity {
            id: id.to_string(),
            kind: Some(self.kind),
            state: self.state,
            taken: self.taken,
            entries: self.entries,
        }
    }
}

/// Read-only view of a child activity, as returned by the execution queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildActivity {
    pub id: String,
    pub kind: Option<NodeKind>,
    pub state: ActivityState,
    pub taken: bool,
    pub entries: usize,
}

impl ChildActivity {
    /// Inert stand-in for a node that was never entered.
    pub fn not_taken(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: None,
            state: ActivityState::Pending,
            taken: false,
            entries: 0,
        }
    }
}

/// Handle to one entry of an activity, passed to listeners.
#[derive(Clone)]
pub struct Activity {
    id: String,
    kind: NodeKind,
    execution_id: ExecutionId,
    latch: Option<Arc<SignalLatch>>,
}

impl Activity {
    pub(crate) fn new(
        id: impl Into<String>,
        kind: NodeKind,
        execution_id: ExecutionId,
        latch: Option<Arc<SignalLatch>>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            execution_id,
            latch,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn is_wait_state(&self) -> bool {
        self.latch.is_some()
    }

    /// Resume this entry of a wait-state task.
    ///
    /// Returns false when there is nothing to resume (not a wait state, or
    /// already signalled); calling it again is a no-op.
    pub fn signal(&self) -> bool {
        let resumed = self.latch.as_ref().map(|l| l.fire()).unwrap_or(false);
        if !resumed {
            tracing::debug!(activity = %self.id, "signal ignored, nothing waiting");
        }
        resumed
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("execution_id", &self.execution_id)
            .field("wait_state", &self.latch.is_some())
            .finish()
    }
}
