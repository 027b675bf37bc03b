use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use super::process::run_bounded;
use crate::domain::outputs::{Alert, Notifier, OutputError};

/// Writes the alert to the log only. Used when no notification program is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), OutputError> {
        info!("🔔 {} ({})", alert.title, alert.body);
        Ok(())
    }
}

/// Desktop notification through an external program, e.g. `notify-send <title> <body>`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), OutputError> {
        info!("🔔 {} ({})", alert.title, alert.body);
        run_bounded(&self.program, &[&alert.title, &alert.body], self.timeout)
            .await
            .map_err(OutputError::Notification)
    }
}
