use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "graphportc", version, about = "graphport tensor graph compiler")]
pub struct Cli {
    /// Log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a JSON graph into an artifact
    Compile {
        /// Graph description (JSON)
        #[arg(long)]
        graph: PathBuf,

        /// Artifact base path; the `.gpa` extension is appended
        #[arg(long)]
        output: PathBuf,

        /// Optimization level 0-3 [default: 0]
        #[arg(short = 'O', long = "opt-level")]
        opt_level: Option<u8>,

        /// Log every phase and dump the generated program at debug level
        #[arg(short, long)]
        verbose: bool,

        /// Replace an existing artifact
        #[arg(long)]
        overwrite: bool,

        /// Compile options (JSON); flags given here take precedence
        #[arg(long)]
        options: Option<PathBuf>,
    },

    /// Print an artifact's metadata
    Inspect {
        #[arg(long)]
        artifact: PathBuf,

        /// Also print the program listing
        #[arg(long)]
        disassemble: bool,
    },

    /// Execute an artifact's entry point on JSON inputs
    Run {
        #[arg(long)]
        artifact: PathBuf,

        /// Entry symbol; defaults to the one recorded in the artifact
        #[arg(long)]
        entry: Option<String>,

        /// Input tensors (JSON array of {dtype, shape, data})
        #[arg(long)]
        inputs: PathBuf,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}
