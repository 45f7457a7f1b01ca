#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "outtrack: rebuild power-outage lifecycles from snapshot history",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    config: cmd::ConfigArgs,

    /// Defaults to `ingest`.
    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Ingestion",
        about = "Replay new snapshots into the event store",
        long_about = "Walk the snapshot repository from the store's checkpoint to head, \
                      classify every outage as Initial, Update or Missing, and commit \
                      one transaction per snapshot. Safe to rerun: it resumes where the \
                      last run stopped.",
        after_help = "EXAMPLES:\n    # Ingest from a local clone\n    outtrack ingest --repo-path ../nspoweroutages\n\n    # Ingest from the default remote into a custom database\n    outtrack ingest --database-file data/outages.db"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Inspection",
        about = "Show the checkpoint, totals and recent active outages",
        after_help = "EXAMPLES:\n    # Human summary\n    outtrack status\n\n    # Machine-readable\n    outtrack status --json --limit 50"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Inspection",
        about = "Show one outage's lifecycle events",
        after_help = "EXAMPLES:\n    # Event log for outage 42\n    outtrack history 42\n\n    # As JSON\n    outtrack history 42 --json"
    )]
    History(cmd::history::HistoryArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Recompute every outage summary from the event log",
        long_about = "Drop the summary cache and recompute it from the stored events in \
                      one transaction. Takes the writer lock, so it waits for a running \
                      ingest to finish.",
        after_help = "EXAMPLES:\n    outtrack rebuild-summaries"
    )]
    RebuildSummaries,

    #[command(
        next_help_heading = "Maintenance",
        about = "Check stored summaries against a replay of their events",
        long_about = "Replay each outage's events and compare the result with its stored \
                      summary. Exits non-zero when any summary differs.",
        after_help = "EXAMPLES:\n    outtrack verify\n\n    # Repair after a failed verify\n    outtrack rebuild-summaries && outtrack verify"
    )]
    Verify,

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    outtrack completions bash > ~/.local/share/bash-completion/completions/outtrack"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("OUTTRACK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "outtrack=debug,info"
        } else {
            "outtrack=info,warn"
        })
    });
    let format = env::var("OUTTRACK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let project_root = env::current_dir()?;
    let output = cli.output_mode();
    let config = &cli.config;

    match &cli.command {
        None => cmd::ingest::run_ingest(
            &cmd::ingest::IngestArgs::default(),
            config,
            output,
            &project_root,
        ),
        Some(Commands::Ingest(args)) => {
            cmd::ingest::run_ingest(args, config, output, &project_root)
        }
        Some(Commands::Status(args)) => {
            cmd::status::run_status(args, config, output, &project_root)
        }
        Some(Commands::History(args)) => {
            cmd::history::run_history(args, config, output, &project_root)
        }
        Some(Commands::RebuildSummaries) => {
            cmd::rebuild::run_rebuild(config, output, &project_root)
        }
        Some(Commands::Verify) => cmd::verify::run_verify(config, output, &project_root),
        Some(Commands::Completions(args)) => {
            let mut command = Cli::command();
            cmd::completions::run_completions(args, &mut command)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::render_failure(output, &err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_ingest() {
        let cli = Cli::parse_from(["outtrack"]);
        assert!(cli.command.is_none());
        assert!(!cli.output_mode().is_json());
    }

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["outtrack", "status", "--json"]);
        assert!(cli.output_mode().is_json());
        assert!(matches!(cli.command, Some(Commands::Status(_))));
    }

    #[test]
    fn config_flags_are_global() {
        let cli = Cli::parse_from([
            "outtrack",
            "verify",
            "--database-file",
            "x.db",
            "--lock-timeout-ms",
            "250",
        ]);
        assert_eq!(
            cli.config.database_file.as_deref(),
            Some(std::path::Path::new("x.db"))
        );
        assert_eq!(cli.config.lock_timeout_ms, Some(250));
        assert!(matches!(cli.command, Some(Commands::Verify)));
    }

    #[test]
    fn history_requires_numeric_id() {
        assert!(Cli::try_parse_from(["outtrack", "history", "abc"]).is_err());
        let cli = Cli::parse_from(["outtrack", "history", "7"]);
        assert!(matches!(
            cli.command,
            Some(Commands::History(cmd::history::HistoryArgs { id: 7 }))
        ));
    }

    #[test]
    fn status_limit_defaults_to_ten() {
        let cli = Cli::parse_from(["outtrack", "status"]);
        match cli.command {
            Some(Commands::Status(args)) => assert_eq!(args.limit, 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn completions_subcommand_parses() {
        let cli = Cli::parse_from(["outtrack", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Completions(cmd::completions::CompletionsArgs {
                shell: clap_complete::Shell::Bash,
            }))
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
