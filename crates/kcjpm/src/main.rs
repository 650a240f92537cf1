//! kcjpm - a package manager and build tool for the Cangjie language.

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

mod commands;
mod reporter;

#[derive(Parser)]
#[command(name = "kcjpm")]
#[command(version, about = "A package manager and build tool for Cangjie", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct GlobalOptions {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Number of parallel jobs
    #[arg(short, long, global = true)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a package in the current directory
    Init {
        /// Package name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Install dependencies and write the lock file
    Install,

    /// Re-resolve dependencies and refresh the lock file
    Update,

    /// Build the package or workspace
    Build {
        /// Build with the release profile
        #[arg(long, short)]
        release: bool,
        /// Profile name (overrides --release)
        #[arg(long)]
        profile: Option<String>,
        /// Target triple
        #[arg(long)]
        target: Option<String>,
        /// Disable incremental reuse
        #[arg(long)]
        no_incremental: bool,
        /// Build a single workspace member
        #[arg(long)]
        member: Option<String>,
    },

    /// Remove build output
    Clean {
        /// Only remove the debug output
        #[arg(long)]
        debug_only: bool,
        /// Report what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    kcjpm_diagnostics::setup();

    let cli = Cli::parse();

    let log_level = match cli.global.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if !cli.global.quiet {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }

    let project = cli
        .global
        .project
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Init { name } => {
            commands::init(&project, name.as_deref()).await?;
        }
        Commands::Install => {
            commands::install(&project, false).await?;
        }
        Commands::Update => {
            commands::install(&project, true).await?;
        }
        Commands::Build {
            release,
            profile,
            target,
            no_incremental,
            member,
        } => {
            let profile = profile.unwrap_or_else(|| {
                if release { "release" } else { "debug" }.to_string()
            });
            let options = commands::BuildCommandOptions {
                profile,
                target,
                jobs: cli.global.jobs,
                incremental: !no_incremental,
                member,
                verbose: cli.global.verbose > 0,
            };
            commands::build(&project, options).await?;
        }
        Commands::Clean {
            debug_only,
            dry_run,
        } => {
            commands::clean(&project, debug_only, dry_run).await?;
        }
    }

    Ok(())
}
