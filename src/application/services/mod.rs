pub mod alert_dispatcher;
pub mod task_service;

pub use alert_dispatcher::{AlertDispatcher, DeliveryOutcome, DeliveryReport, DispatchSettings};
pub use task_service::{SnoozeLength, SnoozeResult, TaskService, TaskServiceError, TaskServiceSettings};
