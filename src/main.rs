#![allow(clippy::cargo_common_metadata)]
use ppc_dispatcher::{
    cli::{self, Args},
    config::Config,
    core::Context,
    setup_logging,
    utils::Interrupt,
};
use std::process::ExitCode;
use tracing::error;

fn run(args: &Args, interrupt: Interrupt) -> anyhow::Result<u8> {
    // Initialize configuration
    let config = Config::from_args(args)?;
    config.ensure_dirs();

    let ctx = Context::new(config, interrupt);

    // Execute the appropriate command
    cli::execute_command(&ctx, args.command.as_ref())
}

fn main() -> ExitCode {
    // Parse command line arguments
    let args = cli::parse_args();

    // Setup logging based on debug flag
    if let Err(e) = setup_logging(args.debug) {
        eprintln!("{e:#}");
    }

    let interrupt = Interrupt::install();

    match run(&args, interrupt) {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(cli::exit_status(&e))
        }
    }
}
