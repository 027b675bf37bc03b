use std::io;
use std::path::{Path, PathBuf};

pub const UNIT_NAME: &str = "bgtask.service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Created,
    Updated,
    Unchanged,
}

/// `~/.config/systemd/user`, where per-user units are picked up.
pub fn user_unit_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("systemd").join("user"))
}

/// Unit that starts the host at login/boot and restarts it whenever it dies.
pub fn render_unit(exe: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=bgtask background scheduler\n\
         After=default.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         ExecStart=\"{}\" host\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        exe.display()
    )
}

/// Writes the unit into `unit_dir`; rewriting an identical unit is a no-op.
pub fn install_user_unit(unit_dir: &Path, exe: &Path) -> io::Result<InstallOutcome> {
    let unit_path = unit_dir.join(UNIT_NAME);
    let unit = render_unit(exe);

    let outcome = match std::fs::read_to_string(&unit_path) {
        Ok(existing) if existing == unit => return Ok(InstallOutcome::Unchanged),
        Ok(_) => InstallOutcome::Updated,
        Err(e) if e.kind() == io::ErrorKind::NotFound => InstallOutcome::Created,
        Err(e) => return Err(e),
    };

    std::fs::create_dir_all(unit_dir)?;
    std::fs::write(&unit_path, unit)?;
    Ok(outcome)
}
