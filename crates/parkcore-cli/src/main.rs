// parkcore CLI entry point.

use clap::Parser;

mod client;
mod commands;
mod exit_code;
mod output;

#[derive(Parser)]
#[command(name = "parkcore", about = "Operational tooling for parkcore-server")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match commands::run(cli.command).await {
        Ok(()) => exit_code::ExitCode::Success.into(),
        Err(err) => {
            output::print_anyhow_error(output::OutputFormat::detect(false), &err);
            exit_code::ExitCode::from_error(&err).into()
        }
    }
}
