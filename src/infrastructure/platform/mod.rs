pub mod autostart;
pub mod instance_lock;
pub mod liveness;

pub use autostart::{InstallOutcome, install_user_unit};
pub use instance_lock::InstanceLock;
pub use liveness::Liveness;
