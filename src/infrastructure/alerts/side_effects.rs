use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::process::{run_bounded, split_command};
use crate::domain::entities::task::SideEffect;
use crate::domain::outputs::{OutputError, SideEffectRunner};

const PATH_PLACEHOLDER: &str = "{path}";

/// Runs task side effects as external programs, each bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct CommandSideEffects {
    wallpaper_command: Option<String>,
    timeout: Duration,
}

impl CommandSideEffects {
    pub fn new(wallpaper_command: Option<String>, timeout: Duration) -> Self {
        Self {
            wallpaper_command,
            timeout,
        }
    }

    /// Expands the wallpaper template; the image is appended when the template has no `{path}`.
    pub fn wallpaper_invocation(
        template: &str,
        image: &Path,
    ) -> Option<(String, Vec<String>)> {
        let (program, args) = split_command(template)?;
        let image = image.display().to_string();

        let mut substituted = false;
        let mut args: Vec<String> = args
            .into_iter()
            .map(|arg| {
                if arg.contains(PATH_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(PATH_PLACEHOLDER, &image)
                } else {
                    arg
                }
            })
            .collect();
        if !substituted {
            args.push(image);
        }
        Some((program, args))
    }
}

#[async_trait]
impl SideEffectRunner for CommandSideEffects {
    async fn run(&self, effect: &SideEffect) -> Result<(), OutputError> {
        match effect {
            SideEffect::Wallpaper { image } => {
                if !image.is_file() {
                    return Err(OutputError::SideEffect(format!(
                        "wallpaper image {} does not exist",
                        image.display()
                    )));
                }
                let template = self.wallpaper_command.as_deref().ok_or_else(|| {
                    OutputError::SideEffect("no wallpaper command configured".to_string())
                })?;
                let (program, args) = Self::wallpaper_invocation(template, image).ok_or_else(|| {
                    OutputError::SideEffect("wallpaper command is empty".to_string())
                })?;

                info!("Setting wallpaper to {}", image.display());
                run_bounded(&program, &args, self.timeout)
                    .await
                    .map_err(OutputError::SideEffect)
            }
            SideEffect::Command { program, args } => {
                info!("Running side effect {}", program);
                run_bounded(program, args, self.timeout)
                    .await
                    .map_err(OutputError::SideEffect)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn wallpaper_template_substitutes_or_appends_the_image() {
        let image = PathBuf::from("/home/me/bg.png");

        let (program, args) = CommandSideEffects::wallpaper_invocation(
            "gsettings set org.gnome.desktop.background picture-uri file://{path}",
            &image,
        )
        .unwrap();
        assert_eq!(program, "gsettings");
        assert_eq!(args.last().unwrap(), "file:///home/me/bg.png");

        let (program, args) = CommandSideEffects::wallpaper_invocation("feh --bg-fill", &image).unwrap();
        assert_eq!(program, "feh");
        assert_eq!(args, vec!["--bg-fill", "/home/me/bg.png"]);
    }

    #[tokio::test]
    async fn missing_wallpaper_is_an_output_failure() {
        let runner = CommandSideEffects::new(Some("true".into()), Duration::from_secs(1));
        let result = runner
            .run(&SideEffect::Wallpaper {
                image: PathBuf::from("/definitely/not/here.png"),
            })
            .await;
        assert!(matches!(result, Err(OutputError::SideEffect(_))));
    }
}
