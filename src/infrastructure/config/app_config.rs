use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::value_objects::DeliveryGuarantee;

/// Env var naming an optional JSON config file.
pub const CONFIG_ENV: &str = "BGTASK_CONFIG";

/// Runtime configuration shared by the host and the CLI front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where the database, lock and liveness files live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Loopback port of the coordination channel.
    #[serde(default = "default_port")]
    pub coordination_port: u16,

    /// IANA zone used to read and display wall-clock times.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub delivery: DeliveryGuarantee,

    /// Days delivered/cancelled tasks are kept. `null` keeps them forever.
    #[serde(default = "default_history_days")]
    pub history_days: Option<u32>,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub snooze: SnoozeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Longest single sleep before the loop re-reads the store.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// A heartbeat older than this means the host is gone.
    #[serde(default = "default_liveness_grace_secs")]
    pub liveness_grace_secs: u64,

    /// Upper bound of the restart backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Consecutive failed commits of the same task before the host asks for a restart.
    #[serde(default = "default_max_delivery_failures")]
    pub max_delivery_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Desktop notification program, called as `<cmd> <title> <body>`. Logged only when unset.
    #[serde(default = "default_notify_command")]
    pub notify_command: Option<String>,

    /// Audio player, called as `<cmd> <file>`.
    #[serde(default = "default_audio_command")]
    pub audio_command: Option<String>,

    #[serde(default)]
    pub default_sound: Option<PathBuf>,

    /// A random file from here is used when a task names no sound.
    #[serde(default)]
    pub sounds_dir: Option<PathBuf>,

    /// Cap on a looping alarm.
    #[serde(default = "default_alarm_max_secs")]
    pub alarm_max_secs: u64,

    /// Wallpaper setter; `{path}` is replaced by the image path.
    #[serde(default = "default_wallpaper_command")]
    pub wallpaper_command: Option<String>,

    #[serde(default = "default_output_timeout_secs")]
    pub output_timeout_secs: u64,

    #[serde(default = "default_side_effect_timeout_secs")]
    pub side_effect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoozeConfig {
    #[serde(default = "default_short_snooze")]
    pub short_secs: i64,

    #[serde(default = "default_long_snooze")]
    pub long_secs: i64,

    /// How far in the past a new task's time may lie before it is rejected.
    #[serde(default = "default_past_grace")]
    pub past_grace_secs: i64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("bgtask")
}

fn default_port() -> u16 {
    47821
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_history_days() -> Option<u32> {
    Some(30)
}

fn default_max_sleep_secs() -> u64 {
    300
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_liveness_grace_secs() -> u64 {
    180
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_max_delivery_failures() -> u32 {
    5
}

fn default_notify_command() -> Option<String> {
    Some("notify-send".to_string())
}

fn default_audio_command() -> Option<String> {
    Some("paplay".to_string())
}

fn default_alarm_max_secs() -> u64 {
    300
}

fn default_wallpaper_command() -> Option<String> {
    Some("gsettings set org.gnome.desktop.background picture-uri file://{path}".to_string())
}

fn default_output_timeout_secs() -> u64 {
    10
}

fn default_side_effect_timeout_secs() -> u64 {
    30
}

fn default_short_snooze() -> i64 {
    60
}

fn default_long_snooze() -> i64 {
    3600
}

fn default_past_grace() -> i64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            coordination_port: default_port(),
            timezone: default_timezone(),
            delivery: DeliveryGuarantee::default(),
            history_days: default_history_days(),
            host: HostConfig::default(),
            alerts: AlertConfig::default(),
            snooze: SnoozeConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_sleep_secs: default_max_sleep_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            liveness_grace_secs: default_liveness_grace_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            max_delivery_failures: default_max_delivery_failures(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notify_command: default_notify_command(),
            audio_command: default_audio_command(),
            default_sound: None,
            sounds_dir: None,
            alarm_max_secs: default_alarm_max_secs(),
            wallpaper_command: default_wallpaper_command(),
            output_timeout_secs: default_output_timeout_secs(),
            side_effect_timeout_secs: default_side_effect_timeout_secs(),
        }
    }
}

impl Default for SnoozeConfig {
    fn default() -> Self {
        Self {
            short_secs: default_short_snooze(),
            long_secs: default_long_snooze(),
            past_grace_secs: default_past_grace(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the JSON file named by `BGTASK_CONFIG`, then `BGTASK_*` variables.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Applies overrides from a variable lookup, normally the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("BGTASK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup("BGTASK_PORT") {
            self.coordination_port = port
                .parse()
                .with_context(|| format!("BGTASK_PORT is not a port number: {}", port))?;
        }
        if let Some(tz) = lookup("BGTASK_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(mode) = lookup("BGTASK_DELIVERY") {
            self.delivery = DeliveryGuarantee::parse(&mode)
                .ok_or_else(|| anyhow!("BGTASK_DELIVERY must be at_least_once or at_most_once"))?;
        }
        if let Some(days) = lookup("BGTASK_HISTORY_DAYS") {
            self.history_days = if days.trim().eq_ignore_ascii_case("forever") {
                None
            } else {
                Some(days.parse().with_context(|| {
                    format!("BGTASK_HISTORY_DAYS is not a number of days: {}", days)
                })?)
            };
        }
        if let Some(cmd) = lookup("BGTASK_NOTIFY_COMMAND") {
            self.alerts.notify_command = non_empty(cmd);
        }
        if let Some(cmd) = lookup("BGTASK_AUDIO_COMMAND") {
            self.alerts.audio_command = non_empty(cmd);
        }
        if let Some(dir) = lookup("BGTASK_SOUNDS_DIR") {
            self.alerts.sounds_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        if self.host.max_sleep_secs == 0 || self.host.heartbeat_secs == 0 {
            return Err(anyhow!("host sleep and heartbeat intervals must be positive"));
        }
        if self.snooze.short_secs <= 0 || self.snooze.long_secs <= 0 {
            return Err(anyhow!("snooze durations must be positive"));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow!("Unknown time zone '{}'", self.timezone))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tasks.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("host.lock")
    }

    pub fn liveness_path(&self) -> PathBuf {
        self.data_dir.join("host.alive")
    }

    pub fn coordination_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.coordination_port))
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.host.max_sleep_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.host.heartbeat_secs)
    }

    pub fn liveness_grace(&self) -> Duration {
        Duration::from_secs(self.host.liveness_grace_secs)
    }

    pub fn history_retention(&self) -> Option<chrono::Duration> {
        self.history_days.map(|d| chrono::Duration::days(d as i64))
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "timezone": "Europe/Madrid", "host": { "heartbeat_secs": 30 } }"#)
                .unwrap();

        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Madrid);
        assert_eq!(config.host.heartbeat_secs, 30);
        assert_eq!(config.host.max_sleep_secs, 300);
        assert_eq!(config.history_days, Some(30));
        assert_eq!(config.snooze.long_secs, 3600);
    }

    #[test]
    fn env_overrides_win() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BGTASK_PORT", "5000"),
            ("BGTASK_DELIVERY", "at-most-once"),
            ("BGTASK_HISTORY_DAYS", "forever"),
            ("BGTASK_AUDIO_COMMAND", ""),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.coordination_port, 5000);
        assert_eq!(config.delivery, DeliveryGuarantee::AtMostOnce);
        assert_eq!(config.history_days, None);
        assert_eq!(config.alerts.audio_command, None);
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let config = AppConfig {
            timezone: "Mars/Olympus".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
