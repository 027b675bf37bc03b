use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Heartbeat flag file: the unix time of the host's last sign of life.
#[derive(Debug, Clone)]
pub struct Liveness {
    path: PathBuf,
}

impl Liveness {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `now` through a temp file and rename, so readers never see a torn value.
    pub async fn beat(&self, now: DateTime<Utc>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&temp, now.timestamp().to_string()).await?;
        fs::rename(&temp, &self.path).await
    }

    pub async fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    pub async fn last_beat(&self) -> io::Result<Option<DateTime<Utc>>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(content
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    /// Alive means a beat no older than `grace`.
    pub async fn is_alive(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match self.last_beat().await {
            Ok(Some(last)) => (now - last).to_std().map_or(true, |age| age <= grace),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn stale_or_missing_beats_mean_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        let liveness = Liveness::new(dir.path().join("host.alive"));
        let now = Utc::now();
        let grace = Duration::from_secs(180);

        assert!(!liveness.is_alive(now, grace).await);

        liveness.beat(now - ChronoDuration::seconds(60)).await.unwrap();
        assert!(liveness.is_alive(now, grace).await);

        liveness.beat(now - ChronoDuration::seconds(600)).await.unwrap();
        assert!(!liveness.is_alive(now, grace).await);

        liveness.clear().await.unwrap();
        assert_eq!(liveness.last_beat().await.unwrap(), None);
    }
}
