//! Status command - list governed MRs from the database

use crate::cli::context::CommandContext;
use crate::cli::style::Stylize;
use anstream::println;
use merge_assist::error::Result;
use merge_assist::types::{MergeRequestRecord, MrStatus};

fn status_cell(status: MrStatus) -> String {
    let text = format!("{:<10}", status.as_str());
    match status {
        MrStatus::Ready | MrStatus::Merged => text.success(),
        MrStatus::NotReady | MrStatus::Rejected => text.warn(),
        MrStatus::Recognized => text.muted(),
    }
}

fn print_record(record: &MergeRequestRecord) {
    println!(
        "  {:<8} {} {:>3} {:>4}  {:<16} {}",
        format!("!{}", record.iid).accent(),
        status_cell(record.status),
        record.rejection_count,
        record.priority,
        record.target_branch,
        record.title
    );
}

/// Print records, optionally for one project only
pub async fn run_status(ctx: &CommandContext, project: Option<&str>) -> Result<()> {
    if let Some(id) = project {
        ctx.project(id)?;
    }
    let store = ctx.open_store().await?;

    let projects: Vec<&str> = match project {
        Some(id) => vec![id],
        None => ctx.config.projects.iter().map(|p| p.id.as_str()).collect(),
    };

    for id in projects {
        let records = store.list_records(Some(id)).await?;
        println!("{}", id.emphasis());
        if records.is_empty() {
            println!("  {}", "No merge requests".muted());
        } else {
            println!(
                "  {}",
                format!(
                    "{:<8} {:<10} {:>3} {:>4}  {:<16} {}",
                    "MR", "STATUS", "STR", "PRIO", "TARGET", "TITLE"
                )
                .muted()
            );
            for record in &records {
                print_record(record);
            }
        }

        if let Some(batch) = store.list_batches(id).await?.first() {
            println!(
                "  {} #{} {} ({} merged, {} failed)",
                "Last batch:".muted(),
                batch.id,
                batch.status,
                batch.merged_count,
                batch.failed_count
            );
        }
        println!();
    }
    Ok(())
}
