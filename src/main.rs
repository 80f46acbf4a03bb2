mod cli;
mod config;
mod invoke;
mod notify;
mod store;
mod trigger;
mod validate;

use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    // parse command line arguments
    let cmdline = cli::Cmdline::parse();

    match cli::invoke(cmdline).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
