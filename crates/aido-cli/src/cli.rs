use std::path::PathBuf;

use aido_core::ResourceType;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "aido")]
#[command(about = "Queue task changes offline and sync them when the API is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue creation of a resource
    #[command(alias = "add")]
    Create {
        #[arg(value_enum)]
        resource: ResourceArg,
        /// Parent task for subtasks
        #[arg(long, value_name = "ID")]
        task_id: Option<String>,
        /// Field assignment, e.g. --set title="Buy milk" --set completed=false
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },
    /// Queue a partial update of a resource
    #[command(alias = "edit")]
    Update {
        #[arg(value_enum)]
        resource: ResourceArg,
        /// Server-side resource ID
        id: String,
        /// Field assignment
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true)]
        set: Vec<String>,
    },
    /// Queue deletion of a resource
    #[command(alias = "rm")]
    Delete {
        #[arg(value_enum)]
        resource: ResourceArg,
        /// Server-side resource ID
        id: String,
    },
    /// Inspect and manage pending operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show connectivity and queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a sync pass now
    Sync {
        /// Keep syncing on reconnect and on a timer until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Review and resolve version conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the API token for a profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResourceArg {
    Task,
    Tag,
    Subtask,
}

impl From<ResourceArg> for ResourceType {
    fn from(value: ResourceArg) -> Self {
        match value {
            ResourceArg::Task => Self::Task,
            ResourceArg::Tag => Self::Tag,
            ResourceArg::Subtask => Self::Subtask,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepArg {
    /// Re-submit the local change over the server state
    Local,
    /// Discard the local change
    Server,
    /// Choose per field with --pick
    Merge,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in sync order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one pending operation without syncing it
    Remove {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Discard every pending operation
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show operations dropped after exhausting their retries
    Dropped {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List operations waiting for conflict resolution
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare local and server values for a conflict
    Show {
        /// Operation ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict
    Resolve {
        /// Operation ID or unique ID prefix
        id: String,
        /// Which side wins
        #[arg(long, value_enum)]
        keep: KeepArg,
        /// Per-field choice for merge, e.g. --pick title=local --pick status=server
        #[arg(long = "pick", value_name = "FIELD=SOURCE")]
        pick: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Task API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Per-request timeout in seconds
        #[arg(long, value_name = "SECS")]
        request_timeout: Option<u64>,
        /// Background sync period in seconds
        #[arg(long, value_name = "SECS")]
        sync_interval: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store an API token in the OS keychain
    Login {
        /// Bearer token (read from stdin when omitted)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Show whether a token is available
    Status,
    /// Remove the stored token
    Logout,
}
