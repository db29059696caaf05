//! CLI entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use autosign_rs::{TaskRunner, load_config};

#[derive(Parser)]
#[command(name = "autosign", version, about = "Automated campus portal check-ins")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // Configuration failures are fatal: nothing runs on a broken config.
    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut runner = match TaskRunner::builder().build(config) {
        Ok(runner) => runner,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let report = runner.run().await;
    println!("{}", report.summary_line());
    ExitCode::SUCCESS
}
