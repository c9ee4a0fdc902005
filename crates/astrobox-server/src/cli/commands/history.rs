//! `astrobox history` – print persisted jobs.

use anyhow::Result;
use astrobox_core::config::AppConfig;
use astrobox_core::job::JobStatus;
use astrobox_core::store::{self, HistoryFilter};

pub fn run_history(
    cfg: &AppConfig,
    status: Option<&str>,
    query: Option<String>,
    limit: usize,
) -> Result<()> {
    let status = status.map(str::parse::<JobStatus>).transpose()?;
    let path = cfg.state_dir()?.join("history.json");
    let data = store::read_snapshot(&path)?;
    let records = data.list(&HistoryFilter {
        status,
        query,
        limit,
        offset: 0,
    });

    if records.is_empty() {
        println!("No jobs in history.");
        return Ok(());
    }
    println!("{:<36} {:<11} {:>6} {:<20} {}", "ID", "STATUS", "PROG", "STARTED", "TITLE");
    for r in records {
        println!(
            "{:<36} {:<11} {:>5.1}% {:<20} {}",
            r.id,
            r.status.as_str(),
            r.progress,
            r.started_at.format("%Y-%m-%d %H:%M:%S"),
            r.title
        );
    }
    Ok(())
}
