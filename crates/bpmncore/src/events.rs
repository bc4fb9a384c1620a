use crate::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during a process run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    Started {
        execution_id: ExecutionId,
        process_id: String,
        timestamp: DateTime<Utc>,
    },
    ActivityStarted {
        execution_id: ExecutionId,
        activity_id: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    ActivityWaiting {
        execution_id: ExecutionId,
        activity_id: String,
        timestamp: DateTime<Utc>,
    },
    ActivityEnded {
        execution_id: ExecutionId,
        activity_id: String,
        timestamp: DateTime<Utc>,
    },
    FlowTaken {
        execution_id: ExecutionId,
        flow_id: String,
        source: String,
        target: String,
        timestamp: DateTime<Utc>,
    },
    /// Run-terminal: every branch retired. Carries the process (root) id.
    Ended {
        execution_id: ExecutionId,
        process_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Run-terminal: an activity errored and the run halted.
    Failed {
        execution_id: ExecutionId,
        activity_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Listener-style event name, e.g. `start-userTask`, `end`, `error`.
    pub fn name(&self) -> String {
        match self {
            ExecutionEvent::Started { .. } => "start".to_string(),
            ExecutionEvent::ActivityStarted { activity_id, .. } => format!("start-{}", activity_id),
            ExecutionEvent::ActivityWaiting { activity_id, .. } => format!("wait-{}", activity_id),
            ExecutionEvent::ActivityEnded { activity_id, .. } => format!("end-{}", activity_id),
            ExecutionEvent::FlowTaken { flow_id, .. } => format!("taken-{}", flow_id),
            ExecutionEvent::Ended { .. } => "end".to_string(),
            ExecutionEvent::Failed { .. } => "error".to_string(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::Started { execution_id, .. }
            | ExecutionEvent::ActivityStarted { execution_id, .. }
            | ExecutionEvent::ActivityWaiting { execution_id, .. }
            | ExecutionEvent::ActivityEnded { execution_id, .. }
            | ExecutionEvent::FlowTaken { execution_id, .. }
            | ExecutionEvent::Ended { execution_id, .. }
            | ExecutionEvent::Failed { execution_id, .. } => *execution_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::Ended { .. } | ExecutionEvent::Failed { .. }
        )
    }
}

/// Publish/subscribe channel scoped to one execution
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        tracing::trace!(event = %event.name(), "emit");
        let _ = self.sender.send(event);
    }
}
