//! Dashboard command - prints the current spend summary

use tracing::info;

/// Refresh billing once and print the summary
pub async fn run() -> anyhow::Result<()> {
    let config = super::bootstrap()?;

    let runtime = crate::create_runtime(&config).await?;
    let summary = runtime.dashboard.refresh().await;
    info!(freshness = ?summary.freshness, status = ?summary.status, "Dashboard refreshed");

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
