use super::{GlobalArgs, open_service};
use crate::output;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use storage::RootReport;

#[derive(Args)]
pub struct RootsArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: RootsArgs) -> Result<()> {
    let service = open_service(global).await?;
    let reports: Vec<RootReport> = service
        .registry()
        .statuses()
        .iter()
        .map(|s| s.report())
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    output::header("Storage Roots");
    println!();
    if reports.is_empty() {
        output::hint("no roots configured; run `stowage init` to create an example");
        return Ok(());
    }

    for report in &reports {
        println!(
            "  {:<16} {:<6} {:<9} {}",
            report.prefix.bold(),
            report.kind,
            output::state_label(report.state),
            report.name
        );
        if let Some(location) = &report.location {
            let mode = report
                .write_mode
                .map(|m| format!(" ({m})"))
                .unwrap_or_default();
            println!("  {:<16} {}{}", "", location.dimmed(), mode.dimmed());
        }
        if let Some(error) = &report.error {
            println!("  {:<16} {}", "", error.red());
        }
    }
    Ok(())
}
