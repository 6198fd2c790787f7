//! Task runner — admission, scheduling, and per-task execution.
//!
//! A single scheduling loop waits for work, admits up to
//! `max_concurrent` running downloads, and spawns one execution task
//! per download. Executions drive the [`fetch`](crate::fetch)
//! collaborators (browser page, aggregator, filehost) through the
//! staged resolution pipeline and always reach a terminal state:
//! whatever happens, the task ends `completed` with or without an
//! error recorded, never stuck `running`.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, FetchError, QueueError, TrackerError};
use crate::event::{Broker, TaskEvent};
use crate::fetch::{
    Aggregator, AggregatorRegistry, BrowserDriver, DownloadDirs, FilehostRegistry, Page,
};
use crate::store::{TaskRecord, TaskStore};
use crate::task::{Task, TaskId, TaskSnapshot, same_key};
use crate::taskq::{CompletionState, TaskProxy};

/// Everything the runner needs to operate.
pub struct RunnerDeps {
    pub broker: Arc<Broker>,
    pub store: Arc<dyn TaskStore>,
    pub driver: Arc<dyn BrowserDriver>,
    pub aggregators: Arc<AggregatorRegistry>,
    pub filehosts: Arc<FilehostRegistry>,
    pub dirs: DownloadDirs,
    pub max_concurrent: usize,
}

pub struct Runner {
    proxy: TaskProxy<Arc<Task>>,
    broker: Arc<Broker>,
    store: Arc<dyn TaskStore>,
    driver: Arc<dyn BrowserDriver>,
    aggregators: Arc<AggregatorRegistry>,
    filehosts: Arc<FilehostRegistry>,
    dirs: DownloadDirs,
    max_concurrent: usize,
}

impl Runner {
    pub fn new(deps: RunnerDeps) -> Arc<Self> {
        Arc::new(Self {
            proxy: TaskProxy::with_comparator(same_key),
            broker: deps.broker,
            store: deps.store,
            driver: deps.driver,
            aggregators: deps.aggregators,
            filehosts: deps.filehosts,
            dirs: deps.dirs,
            max_concurrent: deps.max_concurrent.max(1),
        })
    }

    pub fn proxy(&self) -> &TaskProxy<Arc<Task>> {
        &self.proxy
    }

    /// Admit a new download.
    ///
    /// `slug` may be a bare item identifier for `aggregator`, or a full
    /// item URL, in which case the owning aggregator is inferred from
    /// the URL and `aggregator` is ignored.
    pub async fn admit(&self, aggregator: &str, slug: &str) -> Result<TaskSnapshot, Error> {
        let slug = slug.trim();
        let agg = if slug.starts_with("http://") || slug.starts_with("https://") {
            self.aggregators.by_url(slug)?
        } else {
            self.aggregators.by_name(aggregator)?
        };

        let task = Task::new(agg.name(), slug);
        let snapshot = task.snapshot();

        // Quiet admission: the Admitted event and the store record must be
        // in place before the runner can publish Activated for this task.
        self.proxy.enqueue_if_absent_quiet(task).await?;

        let record = TaskRecord::new(snapshot.clone(), CompletionState::Queued);
        if let Err(e) = self.store.insert(&record).await {
            warn!(task_id = %snapshot.id, error = %e, "Failed to persist admitted task");
        }

        info!(task_id = %snapshot.id, "Task admitted");
        self.broker.publish(TaskEvent::Admitted {
            task: snapshot.clone(),
        });
        self.proxy.wake();
        Ok(snapshot)
    }

    /// Snapshot of every tracked task and its state.
    pub async fn list(&self) -> Vec<(TaskSnapshot, CompletionState)> {
        self.proxy
            .all_tasks()
            .await
            .into_iter()
            .map(|(task, state)| (task.snapshot(), state))
            .collect()
    }

    pub async fn find(&self, id: &TaskId) -> Result<Arc<Task>, TrackerError> {
        self.proxy
            .all_tasks()
            .await
            .into_iter()
            .map(|(task, _)| task)
            .find(|task| task.id() == id)
            .ok_or(TrackerError::NotFound)
    }

    /// Remove a task. Running tasks cannot be removed; cancel them first.
    pub async fn remove(&self, id: &TaskId) -> Result<(), Error> {
        let task = self.find(id).await?;
        self.proxy.remove(&task).await?;

        if let Err(e) = self.store.remove(id).await {
            warn!(task_id = %id, error = %e, "Failed to remove task from store");
        }
        info!(task_id = %id, "Task removed");
        self.broker.publish(TaskEvent::Removed { id: id.clone() });
        Ok(())
    }

    /// Bulk-remove every task in `state`. Rejects `Running`.
    pub async fn remove_in_state(&self, state: CompletionState) -> Result<usize, Error> {
        let victims = self.proxy.tasks_in_state(state).await;
        let removed = self.proxy.remove_from_state(state).await?;

        for task in victims {
            if let Err(e) = self.store.remove(task.id()).await {
                warn!(task_id = %task.id(), error = %e, "Failed to remove task from store");
            }
            self.broker.publish(TaskEvent::Removed {
                id: task.id().clone(),
            });
        }
        info!(count = removed, %state, "Removed tasks in state");
        Ok(removed)
    }

    /// Put a completed task back at the tail of the queue for another
    /// attempt, clearing its previous error and progress.
    pub async fn retry(&self, id: &TaskId) -> Result<TaskSnapshot, Error> {
        let task = self.find(id).await?;
        self.proxy.reset_task_state(&task).await?;
        task.clear_error();

        let snapshot = task.snapshot();
        let record = TaskRecord::new(snapshot.clone(), CompletionState::Queued);
        if let Err(e) = self.store.update(&record).await {
            warn!(task_id = %id, error = %e, "Failed to persist retried task");
        }

        info!(task_id = %id, "Task re-admitted for retry");
        self.broker.publish(TaskEvent::Admitted {
            task: snapshot.clone(),
        });
        self.proxy.wake();
        Ok(snapshot)
    }

    /// Request cooperative cancellation.
    ///
    /// A running task notices at its next cancellation checkpoint and
    /// finishes `completed` with a "cancelled" error; a queued task is
    /// caught by the executor's pre-flight check as soon as it is picked
    /// up.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), Error> {
        let task = self.find(id).await?;
        task.cancel();
        info!(task_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Spawn the scheduling loop. It exits when `shutdown` flips to true.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run(shutdown).await;
        })
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(max_concurrent = self.max_concurrent, "Runner started");

        loop {
            self.drain().await;

            tokio::select! {
                _ = self.proxy.ready() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Runner stopped");
    }

    /// Start queued tasks until the queue is empty or the concurrency
    /// cap is reached.
    async fn drain(self: &Arc<Self>) {
        loop {
            let running = self.proxy.count_from_state(CompletionState::Running).await;
            if running >= self.max_concurrent {
                return;
            }

            let task = match self.proxy.advance_new_task_state().await {
                Ok(task) => task,
                Err(Error::Queue(QueueError::EmptyQueue)) => return,
                Err(e) => {
                    error!(error = %e, "Failed to start queued task");
                    return;
                }
            };

            let runner = Arc::clone(self);
            tokio::spawn(async move {
                runner.execute(task).await;
            });
        }
    }

    /// Run one task to its terminal state.
    async fn execute(&self, task: Arc<Task>) {
        let id = task.id().clone();
        debug!(task_id = %id, "Task activated");
        self.broker.publish(TaskEvent::Activated { id: id.clone() });
        self.persist(&task, CompletionState::Running).await;

        let result = self.resolve_and_download(&task).await;

        match &result {
            Ok(()) => info!(task_id = %id, "Download completed"),
            Err(FetchError::Cancelled) => {
                info!(task_id = %id, "Download cancelled");
                task.record_error("cancelled");
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Download failed");
                task.record_error(e.to_string());
            }
        }

        // Terminal transition happens no matter how the attempt ended.
        if let Err(e) = self.proxy.advance_task_state(&task).await {
            error!(task_id = %id, error = %e, "Failed to mark task completed");
        }
        self.persist(&task, CompletionState::Completed).await;

        let snapshot = task.snapshot();
        self.broker.publish(match result {
            Ok(()) => TaskEvent::Completed { task: snapshot },
            Err(_) => TaskEvent::Failed { task: snapshot },
        });
    }

    async fn persist(&self, task: &Arc<Task>, state: CompletionState) {
        let record = TaskRecord::new(task.snapshot(), state);
        if let Err(e) = self.store.update(&record).await {
            warn!(task_id = %task.id(), error = %e, "Failed to persist task state");
        }
    }

    /// Staged resolution: open a page, resolve the slug through its
    /// aggregator to a filehost, and download. The page is closed on
    /// every exit path.
    async fn resolve_and_download(&self, task: &Arc<Task>) -> Result<(), FetchError> {
        if task.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let aggregator = self.aggregators.by_name(task.aggregator())?;

        let mut page = self.driver.new_page().await?;
        let result = self.run_stages(page.as_mut(), aggregator, task).await;

        if let Err(e) = page.close().await {
            warn!(task_id = %task.id(), error = %e, "Failed to close page");
        }
        result
    }

    async fn run_stages(
        &self,
        page: &mut dyn Page,
        aggregator: Arc<dyn Aggregator>,
        task: &Arc<Task>,
    ) -> Result<(), FetchError> {
        let url = aggregator.resolve_url(task.slug());
        page.goto(&url).await?;
        page.wait_for_load().await?;

        if aggregator.is_404(page).await? {
            return Err(FetchError::NotFound(task.slug().to_string()));
        }

        let display_name = aggregator.display_name(page).await?;
        task.set_display_name(&display_name);

        let filehost_url = aggregator.open_download_page(page).await?;
        task.set_filehost_url(&filehost_url);

        let filehost = self.filehosts.by_url(&filehost_url)?;
        debug!(task_id = %task.id(), filehost = filehost.name(), "Resolved filehost");

        let ext = filehost.file_ext(page).await?;
        let stem = if display_name.trim().is_empty() {
            filehost.file_name(page).await?
        } else {
            display_name
        };
        let filename = format!("{}.{ext}", sanitize_filename(&stem));
        task.set_filename(&filename);

        let broker = Arc::clone(&self.broker);
        let progress_task = Arc::clone(task);
        let on_progress = move |percent: u8| {
            progress_task.set_progress(percent);
            broker.publish(TaskEvent::Progress {
                id: progress_task.id().clone(),
                percent,
            });
        };

        let mut cancel = task.cancel_signal();
        filehost
            .download(page, &self.dirs, &filename, &on_progress, &mut cancel)
            .await
    }
}

/// Strip characters that are unsafe in filenames on common filesystems.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
