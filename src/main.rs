use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use kegworks::colors::{self, ColorChoice};
use kegworks::commands::{self, InstallArgs};
use kegworks::config::{FailurePolicy, Settings};
use kegworks::engine::{CancelToken, Engine};
use kegworks::error::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "keg")]
#[command(author, version, about = "Build and install formulae from source", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Shared install root (overrides KEG_PREFIX)
    #[arg(long, global = true, value_name = "DIR")]
    prefix: Option<PathBuf>,

    /// Maximum number of formulae built at once (overrides KEG_JOBS)
    #[arg(short, long, global = true, value_name = "N")]
    jobs: Option<usize>,

    /// When to use colors
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and install a formula and its dependencies
    Install {
        /// Formula name
        formula: String,

        /// Rebuild even if the keg is already installed
        #[arg(long)]
        force: bool,

        /// Print the plan without building anything
        #[arg(long)]
        dry_run: bool,

        /// Default per-step timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Remove the keg of a formula whose build failed
        #[arg(long)]
        cleanup_failed: bool,

        /// Build options, e.g. --with-sqlite --without-lzma
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "OPTIONS")]
        options: Vec<String>,
    },

    /// Run the test commands of an installed formula
    Test {
        /// Formula name
        formula: String,
    },

    /// Show the dependencies a formula would build with
    Deps {
        /// Formula name
        formula: String,

        /// Show as tree
        #[arg(long)]
        tree: bool,

        /// Build options to resolve dependencies under
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "OPTIONS")]
        options: Vec<String>,
    },

    /// List the options a formula accepts
    Options {
        /// Formula name
        formula: String,
    },

    /// Show information about a formula
    Info {
        /// Formula name
        formula: String,
    },

    /// Re-run the post-install steps of an installed formula
    Postinstall {
        /// Formula name
        formula: String,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn settings(cli: &Cli) -> Settings {
    let mut settings = Settings::from_env();
    if let Some(prefix) = &cli.prefix {
        settings.prefix = prefix.clone();
    }
    if let Some(jobs) = cli.jobs.filter(|j| *j > 0) {
        settings.jobs = jobs;
    }
    if let Commands::Install {
        timeout,
        cleanup_failed,
        ..
    } = &cli.command
    {
        if let Some(secs) = timeout {
            settings.step_timeout = Duration::from_secs(*secs);
        }
        if *cleanup_failed {
            settings.on_failure = FailurePolicy::Clean;
        }
    }
    settings
}

/// Returns whether the command succeeded.
async fn run(cli: Cli) -> Result<bool> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "keg", &mut std::io::stdout());
        return Ok(true);
    }

    let engine = Engine::load(settings(&cli))?;
    tracing::debug!(
        "Loaded {} formulae for {}",
        engine.registry().len(),
        engine.platform().tag()
    );

    match cli.command {
        Commands::Install {
            formula,
            force,
            dry_run,
            options,
            ..
        } => {
            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!(
                        "{} waiting for running builds to finish",
                        "Cancelling:".yellow().bold()
                    );
                    on_signal.cancel();
                }
            });

            let args = InstallArgs {
                formula,
                flags: options,
                force,
                dry_run,
            };
            commands::install(&engine, &args, cancel).await
        }
        Commands::Test { formula } => commands::test(&engine, &formula).await.map(|_| true),
        Commands::Deps {
            formula,
            tree,
            options,
        } => commands::deps(&engine, &formula, &options, tree).map(|_| true),
        Commands::Options { formula } => commands::options(&engine, &formula).map(|_| true),
        Commands::Info { formula } => commands::info(&engine, &formula).map(|_| true),
        Commands::Postinstall { formula } => {
            commands::postinstall(&engine, &formula).await.map(|_| true)
        }
        Commands::Completions { .. } => Ok(true),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
    colors::init_colors(cli.color);

    let ok = match run(cli).await {
        Ok(ok) => ok,
        Err(e) => {
            commands::utils::print_failure(&e);
            false
        }
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
