//! Priority command - change an MR's tie-break priority

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check};
use anstream::println;
use merge_assist::error::Result;

/// Set the priority of a governed MR
pub async fn run_priority(
    ctx: &CommandContext,
    project_id: &str,
    iid: u64,
    priority: i64,
) -> Result<()> {
    ctx.project(project_id)?;
    let store = ctx.open_store().await?;
    store.set_priority(project_id, iid, priority).await?;

    println!(
        "{} Priority of {} set to {}",
        check(),
        format!("!{iid}").accent(),
        priority.emphasis()
    );
    Ok(())
}
