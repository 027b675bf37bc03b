use async_trait::async_trait;
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::task::Task;
use crate::domain::outputs::{AudioCue, OutputError};

const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "ogg", "flac", "m4a", "aac"];

/// Slack added to a probed clip length before a one-shot playback is cut off.
const PLAYBACK_SLACK: Duration = Duration::from_secs(5);

/// Plays alarm sounds through an external player (`paplay`, `afplay`, ...).
///
/// Only one alarm sounds at a time: starting a new one silences the previous one.
pub struct AudioPlayer {
    command: Option<String>,
    default_sound: Option<PathBuf>,
    sounds_dir: Option<PathBuf>,
    alarm_max: Duration,
    current: Mutex<Option<CancellationToken>>,
}

impl AudioPlayer {
    pub fn new(
        command: Option<String>,
        default_sound: Option<PathBuf>,
        sounds_dir: Option<PathBuf>,
        alarm_max: Duration,
    ) -> Self {
        Self {
            command,
            default_sound,
            sounds_dir,
            alarm_max,
            current: Mutex::new(None),
        }
    }

    /// Task sound, then the configured default, then a random file from the sounds directory.
    pub fn resolve_sound(&self, task: &Task) -> Option<PathBuf> {
        task.alert
            .sound
            .clone()
            .or_else(|| self.default_sound.clone())
            .or_else(|| self.sounds_dir.as_deref().and_then(random_sound))
    }
}

/// Picks a random audio file from `dir`.
pub fn random_sound(dir: &Path) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read sounds directory {:?}: {}", dir, e);
            return None;
        }
    };

    let sound_files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_audio_file(path))
        .collect();

    if sound_files.is_empty() {
        debug!("No sound files found in {:?}", dir);
        return None;
    }

    let random_index = rand::thread_rng().gen_range(0..sound_files.len());
    Some(sound_files[random_index].clone())
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Checks that `path` is a playable audio file and returns its length when the container knows it.
pub fn probe_sound(path: &Path) -> Result<Option<Duration>, OutputError> {
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = fs::File::open(path)
        .map_err(|e| OutputError::Audio(format!("cannot open {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| OutputError::Audio(format!("{} is not playable: {}", path.display(), e)))?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| OutputError::Audio(format!("{} has no audio track", path.display())))?;

    let params = &track.codec_params;
    Ok(match (params.n_frames, params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    })
}

#[async_trait]
impl AudioCue for AudioPlayer {
    async fn start(&self, task: &Task) -> Result<(), OutputError> {
        let Some(command) = self.command.clone() else {
            debug!("No audio player configured; task {} fires silently", task.id);
            return Ok(());
        };
        let Some(sound) = self.resolve_sound(task) else {
            debug!("No sound available for task {}", task.id);
            return Ok(());
        };

        let probe_path = sound.clone();
        let clip_length = tokio::task::spawn_blocking(move || probe_sound(&probe_path))
            .await
            .map_err(|e| OutputError::Audio(format!("probe task failed: {}", e)))??;

        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let keep_alarming = task.alert.keep_alarming;
        let cap = if keep_alarming {
            self.alarm_max
        } else {
            clip_length
                .map(|len| (len + PLAYBACK_SLACK).min(self.alarm_max))
                .unwrap_or(self.alarm_max)
        };

        info!(
            "Playing {:?} for task {}{}",
            sound.file_name().unwrap_or_default(),
            task.id,
            if keep_alarming { " until stopped" } else { "" }
        );
        tokio::spawn(play_loop(command, sound, keep_alarming, cap, token));
        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.current.lock().await.take() {
            info!("Alarm stopped");
            token.cancel();
        }
    }
}

async fn play_loop(
    command: String,
    sound: PathBuf,
    keep_alarming: bool,
    cap: Duration,
    token: CancellationToken,
) {
    let deadline = Instant::now() + cap;

    loop {
        let mut child = match Command::new(&command)
            .arg(&sound)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("Cannot start audio player {}: {}", command, e);
                return;
            }
        };

        tokio::select! {
            status = child.wait() => {
                if let Ok(status) = status {
                    if !status.success() {
                        warn!("Audio player exited with {}", status);
                        return;
                    }
                }
            }
            _ = token.cancelled() => {
                let _ = child.kill().await;
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!("Alarm reached its {:?} cap", cap);
                let _ = child.kill().await;
                return;
            }
        }

        if !keep_alarming || Instant::now() >= deadline {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::task::{AlertOptions, NewTask};
    use chrono::Utc;

    fn task_with_sound(sound: Option<PathBuf>) -> Task {
        let new = NewTask::new(Utc::now(), "ring").with_alert(AlertOptions {
            sound,
            ..AlertOptions::default()
        });
        Task::from_new(1, new, Utc::now())
    }

    #[test]
    fn task_sound_wins_over_defaults() {
        let player = AudioPlayer::new(
            None,
            Some(PathBuf::from("/sounds/default.ogg")),
            None,
            Duration::from_secs(60),
        );

        let explicit = task_with_sound(Some(PathBuf::from("/sounds/mine.wav")));
        assert_eq!(player.resolve_sound(&explicit), Some(PathBuf::from("/sounds/mine.wav")));

        let implicit = task_with_sound(None);
        assert_eq!(player.resolve_sound(&implicit), Some(PathBuf::from("/sounds/default.ogg")));
    }

    #[test]
    fn random_sound_only_picks_audio_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not audio").unwrap();
        fs::write(dir.path().join("bell.ogg"), b"OggS").unwrap();

        assert_eq!(random_sound(dir.path()), Some(dir.path().join("bell.ogg")));
    }

    #[test]
    fn garbage_is_not_playable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        fs::write(&path, b"definitely not a wav file").unwrap();

        assert!(matches!(probe_sound(&path), Err(OutputError::Audio(_))));
    }

    #[tokio::test]
    async fn silent_without_a_player() {
        let player = AudioPlayer::new(None, None, None, Duration::from_secs(1));
        assert!(player.start(&task_with_sound(None)).await.is_ok());
        player.stop().await;
    }
}
