mod api;
mod commands;
mod context;
mod exporter;
mod output;
#[cfg(test)]
mod test_helpers;
mod traits;

use clap::{Parser, Subcommand};
use commands::{ExportArgs, ExportCommand, KindsCommand};
use context::Context;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "wsexport")]
#[command(about = "Export the live configuration of a Databricks workspace as Terraform code", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug details (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export workspace resources into .tf files
    Export(ExportArgs),

    /// List the resource kinds the exporter knows about
    Kinds {
        /// Only show kinds of this service
        #[arg(short, long)]
        service: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let ctx = Context::new();

    let result = match cli.command {
        Commands::Export(args) => ExportCommand::execute(&ctx, args),
        Commands::Kinds { service } => KindsCommand::execute(&ctx, service.as_deref()).map(|_| 0),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            1
        }
    };
    std::process::exit(code);
}
