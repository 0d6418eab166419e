#![forbid(unsafe_code)]

//! actl — adaptive control plane CLI entry point.

use clap::Parser;

mod cli;

fn main() {
    let args = cli::Cli::parse();
    std::process::exit(cli::run(&args));
}
