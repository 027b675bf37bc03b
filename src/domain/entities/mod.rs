pub mod host_state;
pub mod messages;
pub mod task;

pub use host_state::HostState;
pub use messages::{HintSender, HostEvent, HostStatus, UiMessage};
pub use task::{AlertOptions, NewTask, SideEffect, Task, TaskEdit, TaskStatus};
