//! Command-line front end: the UI process of the system, plus `host` which runs the execution host.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod add_task;
pub mod cancel_task;
pub mod context;
pub mod edit_task;
pub mod host;
pub mod install;
pub mod list_tasks;
pub mod snooze_task;
pub mod status;
pub mod utils;

pub use context::AppContext;

/// bgtask - persistent reminders that survive restarts and reboots
#[derive(Parser, Debug)]
#[command(name = "bgtask")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "BGTASK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the execution host in the foreground
    Host,

    /// Schedule a new task
    Add(AddArgs),

    /// List tasks (pending by default)
    List {
        /// Include delivered and cancelled tasks
        #[arg(long, conflicts_with = "status")]
        all: bool,

        /// Only tasks with this status: pending, delivered, cancelled
        #[arg(long)]
        status: Option<String>,
    },

    /// Cancel a pending task
    Cancel {
        id: u64,
    },

    /// Change a pending task
    Edit(EditArgs),

    /// Postpone a task; a task that already fired gets a one-shot follow-up
    Snooze {
        id: u64,

        /// Use the long snooze instead of the short one
        #[arg(long, conflicts_with = "secs")]
        long: bool,

        /// Snooze for exactly this many seconds
        #[arg(long)]
        secs: Option<i64>,
    },

    /// Silence the alarm that is currently ringing
    StopAlarm,

    /// Show whether the host is alive and what fires next
    Status,

    /// Stream delivery and status events from the host
    Watch,

    /// Install the systemd user unit that starts the host at login/boot
    Install {
        /// Print the unit instead of writing it
        #[arg(long)]
        print: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// When to fire: "YYYY-MM-DD HH:MM", "HH:MM" or "+30m"
    pub when: String,

    /// Message shown when the task fires
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,

    /// daily | "every N days" | "weekly mon,fri"
    #[arg(long)]
    pub repeat: Option<String>,

    #[command(flatten)]
    pub alert: AlertArgs,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub id: u64,

    /// New fire time (clears any snooze)
    #[arg(long)]
    pub when: Option<String>,

    #[arg(long)]
    pub message: Option<String>,

    #[arg(long, conflicts_with = "no_repeat")]
    pub repeat: Option<String>,

    /// Make the task one-shot
    #[arg(long)]
    pub no_repeat: bool,

    #[command(flatten)]
    pub alert: AlertArgs,
}

#[derive(Args, Debug, Default)]
pub struct AlertArgs {
    /// Audio file to play
    #[arg(long)]
    pub sound: Option<PathBuf>,

    /// Keep ringing until `stop-alarm`
    #[arg(long)]
    pub keep_alarming: bool,

    /// Change the desktop background to this image when the task fires
    #[arg(long, conflicts_with = "exec")]
    pub wallpaper: Option<PathBuf>,

    /// Run this program when the task fires
    #[arg(long)]
    pub exec: Option<String>,

    /// Argument for --exec (repeatable)
    #[arg(long = "arg", requires = "exec")]
    pub exec_args: Vec<String>,
}

impl AlertArgs {
    pub fn is_set(&self) -> bool {
        self.sound.is_some() || self.keep_alarming || self.wallpaper.is_some() || self.exec.is_some()
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = context::load_config(self.config.as_deref())?;

        match self.command {
            Commands::Host => host::run_host(config).await,
            Commands::Add(args) => add_task::run_add_task(&AppContext::open(config).await?, args).await,
            Commands::List { all, status } => {
                list_tasks::run_list_tasks(&AppContext::open(config).await?, all, status).await
            }
            Commands::Cancel { id } => {
                cancel_task::run_cancel_task(&AppContext::open(config).await?, id).await
            }
            Commands::Edit(args) => edit_task::run_edit_task(&AppContext::open(config).await?, args).await,
            Commands::Snooze { id, long, secs } => {
                snooze_task::run_snooze_task(&AppContext::open(config).await?, id, long, secs).await
            }
            Commands::StopAlarm => snooze_task::run_stop_alarm(&AppContext::open(config).await?).await,
            Commands::Status => status::run_status(&AppContext::open(config).await?).await,
            Commands::Watch => status::run_watch(&config).await,
            Commands::Install { print } => install::run_install(print),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_collects_the_whole_message() {
        let cli = Cli::parse_from([
            "bgtask", "add", "+10m", "take", "the", "pizza", "out", "--repeat", "daily",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.message.join(" "), "take the pizza out");
        assert_eq!(args.repeat.as_deref(), Some("daily"));
    }
}
