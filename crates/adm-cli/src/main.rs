use adm_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init_logging() {
        eprintln!("adm: log file unavailable ({}), using stderr", e);
        logging::init_logging_stderr();
    }

    if let Err(err) = Cli::run_from_args().await {
        eprintln!("adm error: {:#}", err);
        std::process::exit(1);
    }
}
