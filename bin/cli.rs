use std::process::ExitCode;

use bugreport_inspector::driver::execute;
use bugreport_inspector::options::{parse_args, Invocation};

fn main() -> ExitCode {
    let options = match parse_args(std::env::args_os()) {
        Ok(Invocation::Run(options)) => options,
        Ok(Invocation::Info(text)) => {
            print!("{}", text);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    // Initialize logging
    let log_level = if options.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    ExitCode::from(execute(&options))
}
