use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use tether_layout::TargetArch;

mod commands;
mod error;
mod io;
mod manifest;

use commands::{handle_check, handle_generate, GenerateArgs};

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Go/cgo binding generator for C libraries", long_about = None)]
struct Args {
    #[command(flatten)]
    verbose: Verbosity<WarnLevel>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Generate bindings from a manifest
    Generate {
        /// Manifest with configuration and declarations
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
        /// Output directory (defaults to the manifest's directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
        /// Go package name
        #[arg(short, long)]
        package: Option<String>,
        /// Target architecture (x86_64, i386, arm64, host, ...)
        #[arg(long, value_parser = parse_arch)]
        arch: Option<TargetArch>,
        /// Number of binding workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,
    },

    /// Report declarations that cannot be bound, without writing files
    Check {
        /// Manifest with configuration and declarations
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
}

fn parse_arch(s: &str) -> Result<TargetArch, String> {
    s.parse().map_err(|e: tether_layout::LayoutError| e.to_string())
}

fn main() -> miette::Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    match args.command {
        Command::Generate {
            manifest,
            output,
            package,
            arch,
            workers,
        } => {
            handle_generate(GenerateArgs {
                manifest,
                output,
                package,
                arch,
                workers,
            })?;
        }
        Command::Check { manifest } => handle_check(manifest)?,
    }
    Ok(())
}
