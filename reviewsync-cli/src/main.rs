//! reviewsync: keep a local review board in step with a remote table.
//!
//! # Usage
//!
//! ```text
//! reviewsync init --base-id <id> --table-id <id> [--view <name>] [--force]
//! reviewsync status [--json]
//! reviewsync list [--search <q>] [--tech <name>] [--branch <name>] [--sort <field>] [--json]
//! reviewsync poll | pause | resume
//! reviewsync save <id> --set <field>=<value>...
//! reviewsync candidates [--json]
//! reviewsync load [<id>...]
//! reviewsync autoload [on|off]
//! reviewsync names [--json]
//! reviewsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    init::InitArgs,
    list::{CandidatesArgs, ListArgs, NamesArgs},
    load::{AutoloadArgs, LoadArgs},
    save::SaveArgs,
    schedule::ScheduleCommand,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "reviewsync",
    version,
    about = "Sync review items between a remote table and a local board",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.reviewsync/config.yaml for a remote table.
    Init(InitArgs),

    /// Show daemon, checkpoint and board status.
    Status(StatusArgs),

    /// List the records currently on the board.
    List(ListArgs),

    /// Run one reconciliation poll now.
    Poll,

    /// Suspend scheduled polling.
    Pause,

    /// Resume scheduled polling with a catch-up poll.
    Resume,

    /// Save field changes to one record.
    Save(SaveArgs),

    /// Show new in-scope records waiting for a manual load.
    Candidates(CandidatesArgs),

    /// Add pending candidates to the board.
    Load(LoadArgs),

    /// Show or change whether new records join the board automatically.
    Autoload(AutoloadArgs),

    /// Re-list linked tables so link fields show current names.
    Names(NamesArgs),

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Poll => commands::schedule::run(ScheduleCommand::Poll),
        Commands::Pause => commands::schedule::run(ScheduleCommand::Pause),
        Commands::Resume => commands::schedule::run(ScheduleCommand::Resume),
        Commands::Save(args) => args.run(),
        Commands::Candidates(args) => args.run(),
        Commands::Load(args) => args.run(),
        Commands::Autoload(args) => args.run(),
        Commands::Names(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
