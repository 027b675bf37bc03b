pub mod execution_host;
pub mod supervisor;

pub use execution_host::{ExecutionHost, HostError, HostSettings};
pub use supervisor::Supervisor;
