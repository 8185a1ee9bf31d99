//! Finalizer executable: `ringmask-finalizer <base_name>`.

use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 1 {
        eprintln!("usage: ringmask-finalizer <base_name>");
        return ExitCode::FAILURE;
    }

    match ringmask::finalizer::run(&args[0]) {
        Ok(_report) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
