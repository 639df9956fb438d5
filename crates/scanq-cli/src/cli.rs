use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "scanq",
    version,
    about = "Queue artifacts for remote scanning without tripping the service's rate limits",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $SCANQ_CONFIG               (environment variable)
  3. ./scanq.yaml                (project)
  4. Platform user config dir + /scanq/config.yaml (e.g. ~/.config or %APPDATA%)
  5. Platform system config path (Unix: /etc/scanq/config.yaml, Windows: %PROGRAMDATA%/scanq/config.yaml)

Environment variables:
  SCANQ_CONFIG      Path to configuration file (overrides default search)
  SCANQ_API_KEY     API key for the scan service (overrides remote.api_key)"
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides SCANQ_CONFIG and default search)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Queue an artifact and process the queue until it is empty
    Submit {
        /// File to submit for scanning
        path: String,

        /// Submission id (default: the file name)
        #[arg(long)]
        id: Option<String>,

        /// Only add the artifact to the queue; process it later with `run`
        #[arg(long)]
        queue_only: bool,
    },

    /// Process queued submissions until the queue is empty
    Run,

    /// Show the active job, pending queue, rate window and last result
    Status,

    /// Generate a minimal configuration file
    Config {
        /// Destination path (skips interactive prompt)
        #[arg(short, long)]
        dest: Option<String>,
    },
}
