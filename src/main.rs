#[macro_use]
extern crate log;

mod cli;

use std::process::ExitCode;

use clap::Parser;
use env_logger::{Builder, Env};

use crate::cli::{Cli, EXIT_FATAL};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = cli::load_config(cli.config.as_deref());
    let level = cli.log_level_override(config.as_ref().ok());
    let mut logger = Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = &level {
        logger.parse_filters(level);
    }
    logger.init();

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match cli::execute(cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
