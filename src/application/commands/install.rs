use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::infrastructure::platform::autostart::{UNIT_NAME, render_unit, user_unit_dir};
use crate::infrastructure::platform::{InstallOutcome, install_user_unit};

/// Registers the host with the user's service manager so it starts at boot and is restarted on exit.
pub fn run_install(print: bool) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the bgtask executable")?;

    if print {
        print!("{}", render_unit(&exe));
        return Ok(());
    }

    let unit_dir = user_unit_dir().ok_or_else(|| anyhow!("Cannot determine the user config directory"))?;
    let outcome = install_user_unit(&unit_dir, &exe)
        .with_context(|| format!("Failed to write {}", unit_dir.join(UNIT_NAME).display()))?;

    match outcome {
        InstallOutcome::Unchanged => println!("{} is already up to date", UNIT_NAME),
        InstallOutcome::Created | InstallOutcome::Updated => {
            info!("Installed {} ({:?})", UNIT_NAME, outcome);
            println!("✅ Wrote {}", unit_dir.join(UNIT_NAME).display());
            println!("   enable it with: systemctl --user daemon-reload && systemctl --user enable --now {}", UNIT_NAME);
        }
    }
    Ok(())
}
