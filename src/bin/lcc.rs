//! `lcc`: command-line front end for the compiler/decompiler library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lcc", version, about = "Compile/decompile flight-controller logic conditions")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Emit the result as JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source script into `logic` commands.
    Compile { file: PathBuf },
    /// Decompile a dump of `logic` commands back into source.
    Decompile { file: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compile { file } => {
            let source = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let output = lcc::orchestrator::compile(&source)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for line in &output.commands {
                    println!("{}", line);
                }
                for warning in &output.warnings {
                    eprintln!("warning: {}", warning);
                }
            }
        }
        Command::Decompile { file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let instructions = lcc::orchestrator::parse_commands(&text)?;
            let output = lcc::orchestrator::decompile(&instructions)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", output.source);
            }
        }
    }
    Ok(())
}
