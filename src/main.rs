use clap::Parser;
use ohlcv_cascade::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
