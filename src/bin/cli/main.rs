//! CLI tool for binary resource injection, extraction, and verification.

mod commands;
mod exit_codes;
mod output;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};

use seastitch::format::PayloadName;

use exit_codes::ExitCode;

/// Embeds and extracts opaque resource payloads inside Mach-O, ELF, and
/// PE executables.
#[derive(Parser)]
#[command(name = "seastitch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format.
    #[arg(long, short = 'f', value_enum, default_value = "human", global = true)]
    format: OutputFormat,

    /// Suppress non-essential stdout output.
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Inject SEA and/or VFS payloads into an executable.
    Inject {
        /// Executable to read.
        #[arg(short = 'e', long)]
        executable: PathBuf,

        /// Path to write the rewritten executable.
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// SEA payload: a blob file, or a `.json` SEA config to delegate
        /// blob generation to the target interpreter.
        #[arg(long)]
        sea: Option<PathBuf>,

        /// VFS payload file.
        #[arg(long)]
        vfs: Option<PathBuf>,

        /// VFS payload file (on-disk variant).
        #[arg(long)]
        vfs_on_disk: Option<PathBuf>,

        /// VFS payload file (in-memory variant).
        #[arg(long)]
        vfs_in_memory: Option<PathBuf>,

        /// Write a zero-byte VFS slot signaling VFS support without
        /// bundling files.
        #[arg(long)]
        vfs_compat: bool,

        /// Skip the compressed-stub repack step even if the input is a
        /// compressed stub.
        #[arg(long)]
        skip_repack: bool,
    },

    /// List the payload slots present in an executable.
    List {
        /// Executable to read.
        executable: PathBuf,
    },

    /// Extract a payload slot to a file.
    Extract {
        /// Executable to read.
        executable: PathBuf,

        /// Payload slot to extract.
        #[arg(value_enum)]
        slot: SlotArg,

        /// Destination file.
        #[arg(short = 'o', long)]
        output: PathBuf,
    },

    /// Verify that a payload slot is present and non-empty.
    Verify {
        /// Executable to read.
        executable: PathBuf,

        /// Payload slot to verify.
        #[arg(value_enum)]
        slot: SlotArg,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SlotArg {
    Sea,
    Vfs,
    PressedData,
}

impl From<SlotArg> for PayloadName {
    fn from(slot: SlotArg) -> Self {
        match slot {
            SlotArg::Sea => PayloadName::Sea,
            SlotArg::Vfs => PayloadName::Vfs,
            SlotArg::PressedData => PayloadName::PressedData,
        }
    }
}

fn init_logging() {
    if std::env::var("RUST_LOG").is_err() && std::env::var("DEBUG").is_ok() {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::Builder::from_default_env().init();
}

fn main() {
    init_logging();

    ctrlc::set_handler(move || {
        eprintln!("\ninterrupted");
        std::process::exit(exit_codes::USER_INTERRUPT);
    })
    .ok();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Inject {
            executable,
            output,
            sea,
            vfs,
            vfs_on_disk,
            vfs_in_memory,
            vfs_compat,
            skip_repack,
        } => commands::inject(&commands::InjectConfig {
            executable: &executable,
            output: &output,
            sea: sea.as_deref(),
            vfs: vfs.as_deref(),
            vfs_on_disk: vfs_on_disk.as_deref(),
            vfs_in_memory: vfs_in_memory.as_deref(),
            vfs_compat,
            skip_repack,
            format: cli.format,
            quiet: cli.quiet,
        }),

        Commands::List { executable } => commands::list(&executable, cli.format),

        Commands::Extract {
            executable,
            slot,
            output,
        } => commands::extract(&executable, slot.into(), &output, cli.format),

        Commands::Verify { executable, slot } => commands::verify(&executable, slot.into(), cli.format),

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            ExitCode::Success
        }
    };

    std::process::exit(exit_code.code());
}
