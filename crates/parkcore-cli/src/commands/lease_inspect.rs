// `parkcore lease-inspect` — read a spot's lease state straight out of the
// coordination cache, bypassing the server's HTTP API entirely.

use chrono::NaiveDate;
use clap::Args;
use uuid::Uuid;

use crate::client;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct LeaseInspectArgs {
    /// Spot id to inspect.
    #[arg(long)]
    spot_id: Uuid,

    /// Booking date (YYYY-MM-DD).
    #[arg(long)]
    date: NaiveDate,

    /// Coordination cache connection string.
    #[arg(long, env = "PARKCORE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub async fn run(args: LeaseInspectArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let inspection = client::inspect_lease(&args.redis_url, args.spot_id, args.date).await?;
    output::print_output(format, &inspection, format_human)?;
    Ok(())
}

fn format_human(inspection: &client::LeaseInspection) -> String {
    let mut lines = vec![format!("guard key: {}", inspection.guard_key)];
    match &inspection.held {
        Some(reservation_id) => {
            lines.push(format!("  held by: {reservation_id}"));
            lines.push(format!("  ttl: {}s", inspection.ttl_seconds));
            match &inspection.metadata_json {
                Some(metadata) => lines.push(format!("  metadata: {metadata}")),
                None => lines.push("  metadata: (none found)".to_string()),
            }
        }
        None => lines.push("  free".to_string()),
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LeaseInspection;

    #[test]
    fn human_format_shows_free_spot() {
        let inspection =
            LeaseInspection { guard_key: "spot_lease:x_2025-09-15".into(), held: None, ttl_seconds: -2, metadata_json: None };
        let output = format_human(&inspection);
        assert!(output.contains("free"));
    }

    #[test]
    fn human_format_shows_held_spot() {
        let inspection = LeaseInspection {
            guard_key: "spot_lease:x_2025-09-15".into(),
            held: Some("res-1".into()),
            ttl_seconds: 120,
            metadata_json: Some("{}".into()),
        };
        let output = format_human(&inspection);
        assert!(output.contains("held by: res-1"));
        assert!(output.contains("ttl: 120s"));
    }
}
