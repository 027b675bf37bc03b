use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs a program to completion within `limit`; the child is killed if the limit passes.
pub async fn run_bounded<S: AsRef<str>>(
    program: &str,
    args: &[S],
    limit: Duration,
) -> Result<(), String> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| format!("cannot start {}: {}", program, e))?;

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| format!("{} failed: {}", program, e))?,
        Err(_) => return Err(format!("{} did not finish within {:?}", program, limit)),
    };

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        ))
    }
}

/// Splits a configured command line on whitespace into program and arguments.
pub fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_from_arguments() {
        let (program, args) = split_command("gsettings set  org.gnome x").unwrap();
        assert_eq!(program, "gsettings");
        assert_eq!(args, vec!["set", "org.gnome", "x"]);
        assert!(split_command("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_commands_are_cut_off() {
        let err = run_bounded("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.contains("did not finish"));

        assert!(run_bounded::<&str>("true", &[], Duration::from_secs(5)).await.is_ok());
        assert!(run_bounded::<&str>("false", &[], Duration::from_secs(5)).await.is_err());
    }
}
