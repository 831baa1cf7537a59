use std::process::ExitCode;

use clap::Parser;
use csfle_range_demo::{run, trace, Config, Options};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = trace::init() {
        eprintln!("Unable to initialize logging: {}", e);
    }
    let options = Options::parse();

    // The credentials file is read before any client exists, so a bad path never reaches the
    // database.
    let config = match Config::load(&options).await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&config).await {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, step = ?e.step(), "walkthrough failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
