pub(crate) mod http;
pub(crate) mod watch;

use crate::engine::Task;

/// Runs a task from a long-lived loop, where errors are reported and
/// swallowed so the loop can keep going.
pub(crate) async fn run_reported(task: &Task) -> bool {
    match task.run().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("task '{}' failed: {e:?}", task.name());
            false
        }
    }
}
