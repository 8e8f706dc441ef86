//! tierkit CLI tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tierkit")]
#[command(about = "Synthesize two-tier serverless deployment topologies", long_about = None)]
struct Cli {
    /// Path to the topology configuration
    #[arg(long, short, env = "TIERKIT_CONFIG", default_value = "tierkit.kdl", global = true)]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the topology and write its manifest
    Synth {
        /// Output file; stdout when omitted
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Pin the assembly id for reproducible output
        #[arg(long)]
        assembly_id: Option<String>,
    },
    /// Parse and assemble without writing anything
    Validate,
    /// Print the rendered outputs
    Outputs {
        /// Assembly id of the synthesized manifest
        #[arg(long)]
        assembly_id: Option<String>,
    },
    /// Print the order resources would be torn down in
    TeardownPlan {
        /// Assembly id of the synthesized manifest
        #[arg(long)]
        assembly_id: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Synth { out, assembly_id } => {
            commands::synth(&cli.config, out.as_deref(), assembly_id.as_deref())?;
        }
        Commands::Validate => {
            commands::validate(&cli.config)?;
        }
        Commands::Outputs { assembly_id } => {
            commands::outputs(&cli.config, assembly_id.as_deref())?;
        }
        Commands::TeardownPlan { assembly_id } => {
            commands::teardown_plan(&cli.config, assembly_id.as_deref())?;
        }
    }

    Ok(())
}
