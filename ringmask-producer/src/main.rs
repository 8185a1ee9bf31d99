//! Producer launcher executable: `ringmask-producer <base_name> <mode> <worker_count>`.

use std::process::ExitCode;
use std::str::FromStr;

use ringmask::config::{ LaunchConfig, Mode };

fn main() -> ExitCode {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 3 {
        eprintln!("usage: ringmask-producer <base_name> <automatic|manual> <worker_count>");
        return ExitCode::FAILURE;
    }

    let base_name = args[0].clone();
    let mode = match Mode::from_str(&args[1]) {
        Ok(mode) => mode,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let worker_count: u32 = match args[2].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("worker count must be a positive integer, got '{}'", args[2]);
            return ExitCode::FAILURE;
        }
    };

    let config = match LaunchConfig::new(base_name, mode, worker_count) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match ringmask::producer::run_launcher(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
