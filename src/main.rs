use bitemporal_migrate::cli::{self, Cli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                cli::EXIT_CONFIGURATION
            } else {
                cli::EXIT_SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    cli::run(&cli)
}
