mod cli;
mod tensors;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use graphport_compiler::{compile, disassemble, CompileOptions, OptLevel};
use graphport_core::{artifact_path, read_metadata, CompiledArtifact};
use graphport_ir::Graph;
use graphport_runtime::{spawn_session, Session};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Compile {
            graph,
            output,
            opt_level,
            verbose,
            overwrite,
            options,
        } => {
            let mut opts = match options {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<CompileOptions>(&text)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => CompileOptions::default(),
            };
            if let Some(level) = opt_level {
                opts.opt_level = OptLevel::try_from(level).map_err(anyhow::Error::msg)?;
            }
            opts.verbose |= verbose;
            opts.overwrite |= overwrite;
            compile_graph(&graph, &output, opts)
        }
        Command::Inspect {
            artifact,
            disassemble,
        } => inspect(&artifact, disassemble),
        Command::Run {
            artifact,
            entry,
            inputs,
            timeout_ms,
        } => run(&artifact, entry, &inputs, timeout_ms.map(Duration::from_millis)).await,
    }
}

fn compile_graph(graph_path: &Path, output: &Path, options: CompileOptions) -> Result<()> {
    let text = std::fs::read_to_string(graph_path)
        .with_context(|| format!("reading {}", graph_path.display()))?;
    let graph = Graph::from_json(&text).with_context(|| format!("parsing {}", graph_path.display()))?;
    let path = artifact_path(output);
    let out = compile(&graph, &path, options)?;
    info!(path = %out.path.display(), stats = %out.stats, "compiled");
    println!("{}", out.path.display());
    Ok(())
}

fn inspect(path: &Path, listing: bool) -> Result<()> {
    if listing {
        let artifact = CompiledArtifact::read(path)
            .with_context(|| format!("reading {}", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&artifact.metadata)?);
        print!("{}", disassemble(&artifact.program));
    } else {
        let metadata =
            read_metadata(path).with_context(|| format!("reading {}", path.display()))?;
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    }
    Ok(())
}

async fn run(
    path: &Path,
    entry: Option<String>,
    inputs: &Path,
    timeout: Option<Duration>,
) -> Result<()> {
    let text = std::fs::read_to_string(inputs)
        .with_context(|| format!("reading {}", inputs.display()))?;
    let args = tensors::parse_inputs(&text)?;

    let symbol = match entry {
        Some(symbol) => symbol,
        None => read_metadata(path)?.entry_symbol,
    };
    let session = Session::open(path, &symbol)?;
    let names: Vec<String> = session
        .signature()
        .outputs
        .iter()
        .map(|spec| spec.name.to_string())
        .collect();

    let (handle, worker) = spawn_session(0, session, 1);
    let response = match timeout {
        Some(deadline) => handle.run_with_deadline(args, deadline).await,
        None => handle.run(args).await,
    };
    handle.close().await;
    let response = response?;
    worker.await?;

    info!(
        queued_us = response.timings.queued_us,
        run_us = response.timings.run_us,
        "run complete"
    );
    let json = tensors::render_outputs(&names, &response.outputs)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
