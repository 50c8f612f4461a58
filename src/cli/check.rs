//! Check command - evaluate one MR without changing anything

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check, cross};
use anstream::println;
use merge_assist::error::Result;
use merge_assist::readiness::evaluate;

/// Fetch an MR and print its readiness
pub async fn run_check(ctx: &CommandContext, project_id: &str, iid: u64) -> Result<()> {
    let project = ctx.project(project_id)?;
    let settings = ctx.settings(project);
    let provider = ctx.provider(project)?;

    let snapshot = provider.fetch_mr(iid).await?;
    let readiness = evaluate(&snapshot, settings.automation_user_id);

    println!(
        "{} {}",
        format!("!{iid}").accent(),
        snapshot.title.emphasis()
    );
    println!(
        "   {} → {}",
        snapshot.source_branch.muted(),
        snapshot.target_branch.muted()
    );
    if !settings.allows_branch(&snapshot.target_branch) {
        println!("   {}", "Target branch is not governed by this project".warn());
    }

    if readiness.is_ready() {
        println!("{} Ready to merge", check());
    } else {
        let label = if readiness.is_transient() {
            "Waiting on pipeline"
        } else {
            "Not ready"
        };
        println!("{} {label}", cross());
        for reason in readiness.messages() {
            println!("   - {}", reason.muted());
        }
    }
    Ok(())
}
