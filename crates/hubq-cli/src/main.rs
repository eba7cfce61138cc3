mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Logging is initialized once the subcommand is known (serve logs to a file).
    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("hubq error: {:#}", err);
        std::process::exit(1);
    }
}
