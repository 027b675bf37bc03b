pub mod entities;
pub mod outputs;
pub mod repositories;
pub mod value_objects;

pub use entities::{
    AlertOptions, HintSender, HostEvent, HostState, HostStatus, NewTask, SideEffect, Task,
    TaskEdit, TaskStatus, UiMessage,
};
pub use repositories::{Delivery, StoreError, StoreResult, TaskRepository};
pub use value_objects::{DeliveryGuarantee, RepeatRule};
