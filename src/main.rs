use clap::Parser;
use ploy_scheduler::cli::Cli;
use ploy_scheduler::entrypoint::ExitStatus;

mod main_dispatch;
mod main_runtime;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let status = match main_dispatch::run(&cli).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitStatus::for_error(&e)
        }
    };

    std::process::exit(status.code());
}
