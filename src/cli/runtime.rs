use clap::{Parser, Subcommand};

/// Singleton component supervisor.
#[derive(Parser, Debug)]
#[command(name = "ploy-scheduler")]
#[command(author = "Ploy Team")]
#[command(version = "0.1.0")]
#[command(
    about = "Run one supervised pipeline component per process, guarded by a Postgres advisory lock",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Component to supervise when no subcommand is given
    #[arg(long, env = "COMPONENT_ID", global = true)]
    pub component: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "config/scheduler.toml", global = true)]
    pub config: String,

    /// Keep all coordination state in this process instead of PostgreSQL
    #[arg(long, global = true)]
    pub in_memory: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Supervise the selected component until signaled (default)
    Run,

    /// Turn a component on
    Enable {
        /// Component id
        component_id: String,
        /// Operator recorded on the settings row
        #[arg(long)]
        by: Option<String>,
        /// Free-form reason
        #[arg(long)]
        note: Option<String>,
    },

    /// Turn a component off; its running instance pauses within one heartbeat
    Disable {
        /// Component id
        component_id: String,
        /// Operator recorded on the settings row
        #[arg(long)]
        by: Option<String>,
        /// Free-form reason
        #[arg(long)]
        note: Option<String>,
    },

    /// Show heartbeat rows with age and liveness (`--component` narrows it)
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent error events of a component
    Errors {
        /// Component id
        component_id: String,
        /// Max events to show (newest first)
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the registered catalog with effective enabled flags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply database migrations
    Migrate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_run() {
        let cli = Cli::try_parse_from(["ploy-scheduler", "--component", "price_poller"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.component.as_deref(), Some("price_poller"));
        assert_eq!(cli.config, "config/scheduler.toml");
    }

    #[test]
    fn test_disable_with_operator_metadata() {
        let cli = Cli::try_parse_from([
            "ploy-scheduler",
            "disable",
            "trailing_stop",
            "--by",
            "alice",
            "--note",
            "exchange maintenance",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Disable {
                component_id,
                by,
                note,
            }) => {
                assert_eq!(component_id, "trailing_stop");
                assert_eq!(by.as_deref(), Some("alice"));
                assert_eq!(note.as_deref(), Some("exchange maintenance"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_errors_limit() {
        let cli =
            Cli::try_parse_from(["ploy-scheduler", "errors", "price_poller", "-l", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Errors { limit: 5, json: false, .. })
        ));
    }
}
