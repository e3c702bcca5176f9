use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use log::error;

use segmask::config::{Cli, Config};
use segmask::pipeline;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let is_display = matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            );
            let _ = err.print();
            std::process::exit(if is_display { 0 } else { 1 });
        }
    };

    let cfg = match Config::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(err) => usage(&err.to_string()),
    };

    if let Err(err) = pipeline::run(&cfg) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

/// Prints the full help text plus the offending condition, then exits
/// with status 1. Matches the established tool's validation contract.
fn usage(errstr: &str) -> ! {
    println!();
    let _ = Cli::command().print_help();
    println!();
    println!("ERROR: {errstr}");
    println!();
    std::process::exit(1);
}
