use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::path::Path;
use std::sync::Arc;

use crate::application::services::{TaskService, TaskServiceSettings};
use crate::domain::entities::task::{AlertOptions, SideEffect};
use crate::domain::repositories::TaskRepository;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::coordination::CoordinationClient;
use crate::infrastructure::repositories::SqliteTaskRepository;

use super::AlertArgs;

/// `--config` wins over `BGTASK_CONFIG`; `BGTASK_*` variables override either.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => AppConfig::load(),
    }
}

pub fn service_settings(config: &AppConfig) -> TaskServiceSettings {
    TaskServiceSettings {
        short_snooze_secs: config.snooze.short_secs,
        long_snooze_secs: config.snooze.long_secs,
        past_grace: chrono::Duration::seconds(config.snooze.past_grace_secs),
    }
}

/// What a UI command needs: the store, the service and the display zone.
pub struct AppContext {
    pub config: AppConfig,
    pub timezone: Tz,
    pub store: Arc<dyn TaskRepository>,
    pub service: TaskService,
    pub client: CoordinationClient,
}

impl AppContext {
    pub async fn open(config: AppConfig) -> Result<Self> {
        let timezone = config.timezone()?;
        let db_path = config.db_path();
        let store: Arc<dyn TaskRepository> = Arc::new(
            SqliteTaskRepository::open(&db_path)
                .await
                .with_context(|| format!("Failed to open task store {}", db_path.display()))?,
        );
        let client = CoordinationClient::new(config.coordination_addr());
        let service = TaskService::new(
            store.clone(),
            Arc::new(client.clone()),
            service_settings(&config),
        );

        Ok(Self {
            config,
            timezone,
            store,
            service,
            client,
        })
    }
}

pub fn alert_options(args: &AlertArgs) -> AlertOptions {
    let side_effect = match (&args.wallpaper, &args.exec) {
        (Some(image), _) => Some(SideEffect::Wallpaper {
            image: image.clone(),
        }),
        (None, Some(program)) => Some(SideEffect::Command {
            program: program.clone(),
            args: args.exec_args.clone(),
        }),
        (None, None) => None,
    };

    AlertOptions {
        sound: args.sound.clone(),
        keep_alarming: args.keep_alarming,
        side_effect,
    }
}
