// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::Parser;

use ptyscript::{parse_file, Driver};

///
/// Runs a match/expect script against a child process spawned on a pseudo-terminal.
///
#[derive(Parser)]
#[command(name = "ptyscript")]
struct Opts {
    /// Default timeout in seconds for match and eof actions.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<f64>,

    /// The script file to run.
    script: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    if opts.timeout.is_some_and(|t| !t.is_finite() || t < 0.0) {
        eprintln!("Timeout must be non-negative");
        exit(1);
    }
    let timeout = opts.timeout.map(Duration::from_secs_f64);
    let code = match parse_file(&opts.script).and_then(|script| Driver::run(&script, timeout)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            1
        }
    };
    exit(code);
}
