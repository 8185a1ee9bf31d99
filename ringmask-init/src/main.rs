//! Initializer executable: `ringmask-init <base_name> <capacity> <mask> <source_path>`.

use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 4 {
        eprintln!("usage: ringmask-init <base_name> <capacity> <mask 0-255> <source_path>");
        return ExitCode::FAILURE;
    }

    let base_name = args[0].clone();
    let capacity: i64 = match args[1].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("capacity must be an integer, got '{}'", args[1]);
            return ExitCode::FAILURE;
        }
    };
    let mask: i64 = match args[2].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("mask must be an integer, got '{}'", args[2]);
            return ExitCode::FAILURE;
        }
    };
    let source_path = PathBuf::from(&args[3]);

    let config = match ringmask::config::InitConfig::new(base_name, capacity, mask, source_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match ringmask::init::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
