use clap::Parser;
use espdump::{
    cli::{config::Config, run, Cli},
    logging::initialize_logger,
};
use log::{debug, LevelFilter};
use miette::Result;

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse();
    debug!("{:#?}", args);

    // Load any user configuration, if present.
    let config = Config::load()?;

    run(args, &config)
}
