// CLI subcommand dispatch.

use clap::Subcommand;

pub mod healthz;
pub mod lease_inspect;

#[derive(Subcommand)]
pub enum Command {
    /// Check server health and readiness
    Healthz(healthz::HealthzArgs),
    /// Inspect a spot's lease state directly in the coordination cache
    LeaseInspect(lease_inspect::LeaseInspectArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Healthz(args) => healthz::run(args).await,
        Command::LeaseInspect(args) => lease_inspect::run(args).await,
    }
}
