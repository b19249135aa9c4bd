mod app;
mod capture;
mod config;
mod display;
mod error;
mod publish;
mod recognition;
mod session;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // clap prints the usage and exits with status 2 on bad arguments
    let config = config::CaptureConfig::parse();

    match app::run(&config) {
        Ok(reason) => {
            log::info!("Exiting: {:?}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
