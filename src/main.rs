use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contagium::manager::Manager;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Check,

    Run {
        #[arg(long, default_value_t = 1)]
        runs: usize,

        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(&args.config).context("failed to construct mgr")?;

    match args.command {
        Command::Check => mgr.check()?,
        Command::Run { runs, seed } => {
            let analyzer = mgr.run_ensemble(runs, seed)?;
            analyzer.log_report();
        }
    }

    Ok(())
}
