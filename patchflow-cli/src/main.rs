//! patchflow — turn CI patches into versions, builds and tasks.
//!
//! # Usage
//!
//! ```text
//! patchflow finalize <patch> [--requester patch|github_pr|merge_queue|trigger|mainline]
//! patchflow configure <patch> --file <update.yaml>
//! patchflow cancel <patch> [--user <name>]
//! patchflow abort-pr --owner <o> --repo <r> --pr <n> [--closed] [--new-version <id>]
//! patchflow patched-project <patch> [--store]
//! patchflow config-diff <patch>
//! patchflow show <patch> [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cancel::{AbortPrArgs, CancelArgs},
    configure::ConfigureArgs,
    finalize::FinalizeArgs,
    project::{ConfigDiffArgs, PatchedProjectArgs},
    show::ShowArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "patchflow",
    version,
    about = "Materialize CI patches into versions, builds and tasks",
    long_about = None,
)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the version, builds and tasks of a patch.
    Finalize(FinalizeArgs),

    /// Change a patch's selection or description.
    Configure(ConfigureArgs),

    /// Cancel a patch: abort its version or drop it when unfinalized.
    Cancel(CancelArgs),

    /// Abort every finalized patch of a pull request.
    AbortPr(AbortPrArgs),

    /// Print the project a patch would run with.
    PatchedProject(PatchedProjectArgs),

    /// Show the diff a patch applies to the configuration file.
    ConfigDiff(ConfigDiffArgs),

    /// Show a patch and, once finalized, its tasks.
    Show(ShowArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    match cli.command {
        Commands::Finalize(args) => args.run(),
        Commands::Configure(args) => args.run(),
        Commands::Cancel(args) => args.run(),
        Commands::AbortPr(args) => args.run(),
        Commands::PatchedProject(args) => args.run(),
        Commands::ConfigDiff(args) => args.run(),
        Commands::Show(args) => args.run(),
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
