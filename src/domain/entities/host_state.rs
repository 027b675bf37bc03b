use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the execution host.
///
/// `Stopped → Starting → Running ⇄ Suspended → Stopped`. A forced kill or a
/// reboot lands in `Stopped` without ceremony; the next launch always goes
/// through `Starting`, which reloads everything from the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Stopped,
    Starting,
    Running,
    Suspended,
}

impl HostState {
    pub fn can_transition_to(&self, next: HostState) -> bool {
        use HostState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Suspended)
                | (Suspended, Running)
                | (Running, Stopped)
                | (Suspended, Stopped)
        )
    }

    /// Whether the loop is alive, as reported to the UI.
    pub fn is_live(&self) -> bool {
        matches!(self, HostState::Running | HostState::Suspended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Stopped => "stopped",
            HostState::Starting => "starting",
            HostState::Running => "running",
            HostState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
