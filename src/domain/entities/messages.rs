use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::host_state::HostState;

/// UI → host. Every variant is only a hint to re-evaluate the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiMessage {
    TaskCreated { id: u64 },
    TaskEdited { id: u64 },
    TaskCancelled { id: u64 },
    /// Silence a looping alarm.
    StopAlarm,
}

impl UiMessage {
    pub fn task_id(&self) -> Option<u64> {
        match self {
            UiMessage::TaskCreated { id }
            | UiMessage::TaskEdited { id }
            | UiMessage::TaskCancelled { id } => Some(*id),
            UiMessage::StopAlarm => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Running,
    Stopped,
}

impl From<HostState> for HostStatus {
    fn from(state: HostState) -> Self {
        if state.is_live() {
            HostStatus::Running
        } else {
            HostStatus::Stopped
        }
    }
}

/// Host → UI. Best effort: the UI always re-reads the store for the truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    TaskDelivered { id: u64 },
    HostStatus { status: HostStatus },
}

/// Sends a wake hint to the execution host. Returns `false` when the hint was dropped.
#[async_trait]
pub trait HintSender: Send + Sync {
    async fn send_hint(&self, message: UiMessage) -> bool;
}

/// In-process hosts receive hints straight from a channel.
#[async_trait]
impl HintSender for mpsc::UnboundedSender<UiMessage> {
    async fn send_hint(&self, message: UiMessage) -> bool {
        self.send(message).is_ok()
    }
}
