use futures_util::FutureExt;
use metrics::counter;
use std::{
    borrow::Cow,
    time::{Duration, Instant},
};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct TaskHandle {
    name: Cow<'static, str>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: impl Into<Cow<'static, str>>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> (Cow<'static, str>, JoinHandle<()>) {
        (self.name, self.handle)
    }
}

#[derive(Default)]
pub struct TaskManager {
    tasks: Vec<TaskHandle>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn push(&mut self, task: TaskHandle) {
        trace!(task = task.name(), "task registered");
        counter!("pulse_tasks_started_total", "task" => task.name().to_string()).increment(1);
        self.tasks.push(task);
    }

    pub fn extend<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = TaskHandle>,
    {
        for task in tasks {
            self.push(task);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn shutdown_with_grace(self, grace: Duration) {
        for task in self.tasks {
            let (name_cow, mut handle) = task.into_inner();
            let name = name_cow.into_owned();

            if grace.is_zero() {
                handle.abort();
                let result = handle.await;
                let outcome = if result.is_ok() {
                    TaskOutcome::Completed
                } else {
                    debug!(task = %name, ?result, "task join after abort failed");
                    TaskOutcome::Aborted
                };
                record_outcome(&name, outcome);
                continue;
            }

            let sleeper = tokio::time::sleep(grace);
            tokio::pin!(sleeper);
            let outcome = tokio::select! {
                res = &mut handle => {
                    if let Err(err) = res {
                        debug!(task = %name, ?err, "task exited with error");
                        TaskOutcome::Aborted
                    } else {
                        TaskOutcome::Completed
                    }
                }
                _ = &mut sleeper => {
                    handle.abort();
                    match handle.await {
                        Ok(_) => TaskOutcome::Completed,
                        Err(err) => {
                            debug!(task = %name, ?err, "task join after abort failed");
                            TaskOutcome::Aborted
                        }
                    }
                }
            };
            record_outcome(&name, outcome);
        }
    }
}

enum TaskOutcome {
    Completed,
    Aborted,
}

fn record_outcome(name: &str, outcome: TaskOutcome) {
    let label = match outcome {
        TaskOutcome::Completed => "completed",
        TaskOutcome::Aborted => "aborted",
    };
    counter!(
        "pulse_tasks_stopped_total",
        "task" => name.to_string(),
        "outcome" => label
    )
    .increment(1);
}

/// Spawn a supervised background task that restarts on panic with exponential backoff.
/// Use for long-running loops that should survive transient failures.
pub fn spawn_supervised<F, Fut>(name: impl Into<Cow<'static, str>>, mut factory: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let name_cow = name.into();
    let name_for_task = name_cow.clone();
    let handle = tokio::spawn(async move {
        let mut backoff_ms: u64 = 200;
        // Thrash detection window
        let window = Duration::from_secs(30);
        let mut window_start = Instant::now();
        let mut restarts_in_window: u32 = 0;
        loop {
            // Catch panics from the future body to keep the supervisor alive.
            let result = std::panic::AssertUnwindSafe(factory()).catch_unwind().await;
            match result {
                Ok(()) => {
                    tracing::debug!(task = %name_for_task, "supervised task completed normally");
                    break;
                }
                Err(_) => {
                    let now = Instant::now();
                    if now.duration_since(window_start) > window {
                        window_start = now;
                        restarts_in_window = 0;
                    }
                    restarts_in_window = restarts_in_window.saturating_add(1);
                    counter!("pulse_task_restarts_total", "task" => name_for_task.to_string())
                        .increment(1);
                    tracing::error!(
                        task = %name_for_task,
                        backoff_ms,
                        restarts_in_window,
                        "supervised task panicked; restarting"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms.saturating_mul(2)).min(10_000);
                }
            }
        }
    });
    TaskHandle::new(name_cow, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn supervised_task_restarts_after_panic() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs_task = runs.clone();
        let handle = spawn_supervised("flaky", move || {
            let runs = runs_task.clone();
            async move {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            }
        });
        let mut manager = TaskManager::new();
        manager.push(handle);
        manager.shutdown_with_grace(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_aborts_long_running_tasks() {
        let mut manager = TaskManager::new();
        manager.push(TaskHandle::new(
            "forever",
            tokio::spawn(async {
                loop {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }),
        ));
        assert_eq!(manager.len(), 1);
        tokio::time::timeout(
            Duration::from_secs(2),
            manager.shutdown_with_grace(Duration::from_millis(20)),
        )
        .await
        .expect("shutdown completes after grace");
    }
}
