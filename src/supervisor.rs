//! Supervision of project loops and watchers
//!
//! Every project loop runs as its own task. A loop that ends with an error
//! is restarted after an exponential backoff; watchers log their own
//! failures and only end on shutdown.

use crate::events::Watcher;
use crate::reconcile::ProjectLoop;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Backoff between restarts of a failed loop
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Owns the tasks of every governed project
pub struct Supervisor {
    cancel: CancellationToken,
    restart: RestartPolicy,
    loops: Vec<Arc<ProjectLoop>>,
    watchers: Vec<Watcher>,
}

impl Supervisor {
    /// Create a supervisor stopped by `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            restart: RestartPolicy::default(),
            loops: Vec::new(),
            watchers: Vec::new(),
        }
    }

    /// Override the restart backoff
    #[must_use]
    pub const fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Add a project loop
    pub fn add_loop(&mut self, project_loop: ProjectLoop) {
        self.loops.push(Arc::new(project_loop));
    }

    /// Add an assignment watcher
    pub fn add_watcher(&mut self, watcher: Watcher) {
        self.watchers.push(watcher);
    }

    /// Run every task until the cancellation token fires and all tasks
    /// have wound down.
    pub async fn run(self) {
        let mut tasks = JoinSet::new();

        for project_loop in self.loops {
            tasks.spawn(supervise(project_loop, self.cancel.clone(), self.restart));
        }
        for watcher in self.watchers {
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = watcher.run(cancel).await {
                    error!(error = %e, "watcher ended with error");
                }
            });
        }

        info!(tasks = tasks.len(), "supervisor started");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "supervised task panicked");
            }
        }
        info!("supervisor stopped");
    }
}

/// Run a loop, restarting it after failures until cancelled
async fn supervise(project_loop: Arc<ProjectLoop>, cancel: CancellationToken, policy: RestartPolicy) {
    let mut delay = policy.initial_delay;

    loop {
        let started = Instant::now();
        match project_loop.run(cancel.clone()).await {
            Ok(()) => return,
            Err(e) if e.is_fatal() => {
                error!(project = project_loop.project(), error = %e, "project loop failed");
            }
            Err(e) => {
                warn!(project = project_loop.project(), error = %e, "project loop ended with error");
            }
        }

        // A loop that stayed up for a while starts its backoff afresh.
        if started.elapsed() > policy.max_delay {
            delay = policy.initial_delay;
        }

        info!(project = project_loop.project(), delay_ms = delay.as_millis(), "restarting project loop");
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(policy.max_delay);
    }
}
