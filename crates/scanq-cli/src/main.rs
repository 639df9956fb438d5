mod cli;
mod cmd;
mod config_gen;
mod format;
mod progress;
mod signal;
mod table;

use clap::Parser;

use scanq_core::config;

use cli::{Cli, Commands};
use config_gen::run_config_generate;

fn main() {
    let cli = Cli::parse();

    // Initialize logging — auto-upgrade to info for the foreground runner
    let filter = match cli.verbose {
        0 if matches!(&cli.command, Some(Commands::Run)) => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(progress::ProgressAwareStderr)
        .init();

    // Handle `config` subcommand early — no config file needed
    if let Some(Commands::Config { dest }) = &cli.command {
        if let Err(e) = run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let source = match config::resolve_config_path(cli.config.as_deref()) {
        Some(s) => s,
        None => {
            eprintln!("Error: no configuration file found.");
            eprintln!("Searched:");
            for (path, level) in config::default_config_search_paths() {
                eprintln!("  {} ({})", path.display(), level);
            }
            eprintln!();
            eprintln!("Run `scanq config` to generate a starter config file.");
            std::process::exit(1);
        }
    };

    tracing::info!("Using config: {source}");

    let cfg = match config::load_config(source.path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if matches!(
        &cli.command,
        Some(Commands::Submit { .. }) | Some(Commands::Run)
    ) {
        signal::install_signal_handlers();
    }

    let result = match &cli.command {
        Some(Commands::Submit {
            path,
            id,
            queue_only,
        }) => cmd::submit::run_submit(&cfg, path, id.as_deref(), *queue_only),
        Some(Commands::Run) => cmd::run::run_queue(&cfg),
        Some(Commands::Status) | None => cmd::status::run_status(&cfg),
        Some(Commands::Config { .. }) => {
            Err("'config' command should be handled before config resolution".into())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
