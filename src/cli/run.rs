//! Run command - start every project loop and block until shutdown

use crate::cli::context::CommandContext;
use merge_assist::annotate::CommentingSink;
use merge_assist::error::Result;
use merge_assist::events::{EventHub, EventSource, HubEventSource, Watcher};
use merge_assist::reconcile::ProjectLoop;
use merge_assist::supervisor::Supervisor;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run the service until Ctrl-C or SIGTERM
pub async fn run_service(ctx: &CommandContext) -> Result<()> {
    let store = ctx.open_store().await?;
    let hub = EventHub::new();
    let events: Arc<dyn EventSource> = Arc::new(HubEventSource::new(hub.clone(), store.clone()));
    let cancel = CancellationToken::new();
    let mut supervisor = Supervisor::new(cancel.clone());
    let user_id = ctx.config.gitlab.automation_user_id;

    for project in &ctx.config.projects {
        let provider = ctx.provider(project)?;
        let settings = ctx.settings(project);
        let sink = Arc::new(CommentingSink::new(
            Arc::clone(&provider),
            settings.labels.clone(),
        ));

        supervisor.add_watcher(Watcher::new(
            project.id.clone(),
            Arc::clone(&provider),
            hub.clone(),
            user_id,
            settings.sweep_interval,
        ));
        supervisor.add_loop(ProjectLoop::new(
            settings,
            provider,
            sink,
            Arc::clone(&events),
            store.clone(),
        ));
        info!(project = %project.id, gitlab_project = %project.gitlab_project, "project configured");
    }

    let supervisor = tokio::spawn(supervisor.run());

    shutdown_signal().await;
    info!("shutdown signal received, stopping project loops");
    cancel.cancel();

    if let Err(e) = supervisor.await {
        error!(error = %e, "supervisor task failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
