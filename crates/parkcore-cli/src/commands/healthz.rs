// `parkcore healthz` — check server liveness and readiness.

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::client::OpsClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct HealthzArgs {
    /// Base URL of the parkcore-server instance to check.
    #[arg(long, env = "PARKCORE_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResult {
    pub ready: bool,
    pub db_connected: bool,
    pub cache_probed: bool,
}

pub async fn run(args: HealthzArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let client = OpsClient::new(args.server);

    let (_, readiness) = client.get_json::<ReadinessResult>("/readyz").await?;
    output::print_output(format, &readiness, format_human)?;

    if !readiness.ready {
        anyhow::bail!("server reported not ready");
    }
    Ok(())
}

fn format_human(result: &ReadinessResult) -> String {
    format!(
        "ready: {}\n  db_connected: {}\n  cache_probed: {}",
        result.ready, result.db_connected, result.cache_probed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_format_reports_all_fields() {
        let result = ReadinessResult { ready: true, db_connected: true, cache_probed: true };
        let output = format_human(&result);
        assert!(output.contains("ready: true"));
        assert!(output.contains("db_connected: true"));
        assert!(output.contains("cache_probed: true"));
    }
}
