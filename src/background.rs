use std::fmt::Display;
use std::future::Future;

use tracing::warn;

/// Run `task` detached from the request. Nobody joins it; an error ends up in
/// the log and nowhere else.
pub fn spawn_logged<F, E>(name: &'static str, task: F)
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background task failed");
        }
    });
}
