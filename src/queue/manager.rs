use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;
use super::abort::{AbortHandle, AbortReason};
use super::client::Transport;
use super::errors::{Result, UploadError};
use super::observer::UploadObserver;
use super::task::UploadTask;
use super::types::{FilePayload, QueueConfig, TransferProgress, UploadEvent, UploadId, UploadStatus};
use super::worker::{TransferOutcome, TransferWorker};

/// Statuses a transfer may be started from
#[derive(Debug, Clone, Copy)]
enum Admission {
    /// Only queued tasks, used by `start_uploads`
    Queued,
    /// Queued, paused or failed tasks, used by `upload_file` and `resume_upload`
    Restart,
}

impl Admission {
    fn admits(self, status: UploadStatus) -> bool {
        match self {
            Self::Queued => status == UploadStatus::Queued,
            Self::Restart => matches!(
                status,
                UploadStatus::Queued | UploadStatus::Paused | UploadStatus::Failed
            ),
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Insertion order is display order
    tasks: Vec<UploadTask>,
    /// Live transfer attempts, keyed by task
    controllers: HashMap<UploadId, AbortHandle>,
}

impl QueueState {
    fn task_mut(&mut self, upload_id: UploadId) -> Option<&mut UploadTask> {
        self.tasks.iter_mut().find(|task| task.id == upload_id)
    }

    fn owns(&self, upload_id: UploadId, attempt: u64) -> bool {
        self.controllers
            .get(&upload_id)
            .is_some_and(|handle| handle.attempt() == attempt)
    }

    /// Drop the registry entry if it still belongs to `attempt`.
    fn release(&mut self, upload_id: UploadId, attempt: u64) -> bool {
        if self.owns(upload_id, attempt) {
            self.controllers.remove(&upload_id);
            true
        } else {
            false
        }
    }
}

struct Shared {
    config: QueueConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<QueueState>,
    slots: Arc<Semaphore>,
    event_tx: broadcast::Sender<UploadEvent>,
    observers: Vec<Arc<dyn UploadObserver>>,
    /// Observer deliveries not yet made, in publish order
    pending: Mutex<VecDeque<UploadEvent>>,
    /// Held by the one thread currently draining `pending`
    dispatching: Mutex<()>,
    next_attempt: AtomicU64,
}

impl Shared {
    /// Must be called with the state lock held, so events go out in the
    /// same order as the changes they describe.
    fn publish(&self, event: UploadEvent) {
        if !self.observers.is_empty() {
            self.pending.lock().push_back(event.clone());
        }
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn publish_status(&self, task: &UploadTask, old_status: UploadStatus) {
        if task.status != old_status {
            self.publish(UploadEvent::StatusChanged {
                upload_id: task.id,
                old_status,
                new_status: task.status,
                error: task.error.clone(),
            });
        }
    }

    /// Run observer callbacks for published events. Must be called after
    /// the state lock is released.
    ///
    /// Only one thread drains at a time; a caller that finds the queue busy
    /// leaves its events to the current drainer.
    fn notify_observers(&self) {
        if self.observers.is_empty() {
            return;
        }

        loop {
            let Some(dispatching) = self.dispatching.try_lock() else {
                return;
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some(event) = next else {
                    break;
                };
                self.deliver(&event);
            }
            drop(dispatching);

            // Something may have been queued between the last pop and the unlock
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, event: &UploadEvent) {
        for observer in &self.observers {
            match event {
                UploadEvent::Progress { upload_id, progress } => observer.on_progress(*upload_id, *progress),
                UploadEvent::StatusChanged { upload_id, new_status, .. } => {
                    observer.on_status_change(*upload_id, *new_status)
                }
                UploadEvent::Added { .. } | UploadEvent::Removed { .. } => {}
            }
        }
    }
}

/// Counts per status, for a progress header or a completion card
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub total: usize,
    pub queued: usize,
    pub uploading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean progress over all tasks
    pub overall_progress: u8,
}

impl QueueSummary {
    /// Every task either completed or failed.
    pub fn all_settled(&self) -> bool {
        self.total > 0 && self.completed + self.failed == self.total
    }
}

/// Upload queue manager.
///
/// Cloning is cheap and every clone drives the same queue. Per-task
/// failures are recorded on the task and never surface as errors here.
#[derive(Clone)]
pub struct UploadQueue {
    shared: Arc<Shared>,
}

pub struct UploadQueueBuilder {
    config: QueueConfig,
    transport: Option<Arc<dyn Transport>>,
    observers: Vec<Arc<dyn UploadObserver>>,
}

impl UploadQueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            transport: None,
            observers: Vec::new(),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<UploadQueue> {
        let transport = self
            .transport
            .ok_or_else(|| UploadError::config_error("an upload transport is required"))?;
        if self.config.max_concurrent == 0 {
            return Err(UploadError::config_error("max_concurrent must be greater than 0"));
        }

        let (event_tx, _) = broadcast::channel(self.config.event_capacity.max(1));

        Ok(UploadQueue {
            shared: Arc::new(Shared {
                slots: Arc::new(Semaphore::new(self.config.max_concurrent)),
                config: self.config,
                transport,
                state: Mutex::new(QueueState::default()),
                event_tx,
                observers: self.observers,
                pending: Mutex::new(VecDeque::new()),
                dispatching: Mutex::new(()),
                next_attempt: AtomicU64::new(1),
            }),
        })
    }
}

impl Default for UploadQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadQueue {
    pub fn builder() -> UploadQueueBuilder {
        UploadQueueBuilder::new()
    }

    pub fn new(transport: Arc<dyn Transport>, config: QueueConfig) -> Result<Self> {
        Self::builder().config(config).transport(transport).build()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Append one queued task per file, preserving order. No network activity.
    pub fn add_files(&self, files: impl IntoIterator<Item = FilePayload>) -> Vec<UploadTask> {
        let created: Vec<UploadTask> = files.into_iter().map(UploadTask::new).collect();

        {
            let mut state = self.shared.state.lock();
            for task in &created {
                tracing::debug!(upload_id = %task.id, file = %task.payload.name, size = task.file_size, "upload queued");
                state.tasks.push(task.clone());
                self.shared.publish(UploadEvent::Added { upload_id: task.id });
            }
        }
        self.shared.notify_observers();

        created
    }

    /// Upload every queued task in batches of `max_concurrent`.
    ///
    /// A batch is dispatched only after every member of the previous one has
    /// completed, failed, been cancelled or been paused.
    pub async fn start_uploads(&self) {
        let queued: Vec<UploadId> = {
            let state = self.shared.state.lock();
            state
                .tasks
                .iter()
                .filter(|task| task.status == UploadStatus::Queued && !state.controllers.contains_key(&task.id))
                .map(|task| task.id)
                .collect()
        };

        if queued.is_empty() {
            tracing::debug!("no queued uploads to start");
            return;
        }

        let batch_size = self.shared.config.max_concurrent;
        tracing::info!(count = queued.len(), batch_size, "starting uploads");

        for (batch, upload_ids) in queued.chunks(batch_size).enumerate() {
            tracing::debug!(batch, size = upload_ids.len(), "dispatching batch");

            let handles: Vec<_> = upload_ids
                .iter()
                .map(|upload_id| self.spawn_transfer(*upload_id, Admission::Queued))
                .collect();

            for result in join_all(handles).await {
                if let Err(err) = result {
                    tracing::error!(batch, error = %err, "transfer task ended abnormally");
                }
            }
        }

        tracing::info!("upload batches settled");
    }

    /// Transfer a single task now, from the beginning.
    ///
    /// Accepts queued, paused and failed tasks; anything else is left alone.
    /// Waits for a free transfer slot first.
    pub async fn upload_file(&self, upload_id: UploadId) {
        if let Err(err) = self.spawn_transfer(upload_id, Admission::Restart).await {
            tracing::error!(%upload_id, error = %err, "transfer task ended abnormally");
        }
    }

    /// Interrupt a queued or uploading task, leaving it `paused`.
    ///
    /// The server is notified for transfers that were in flight; a failed
    /// notification is logged and does not undo the local transition.
    pub async fn pause_upload(&self, upload_id: UploadId) {
        let (handle, was_uploading) = {
            let mut state = self.shared.state.lock();
            let Some(task) = state.task_mut(upload_id) else {
                tracing::debug!(%upload_id, "pause ignored, unknown upload");
                return;
            };

            let old_status = task.status;
            if !matches!(old_status, UploadStatus::Queued | UploadStatus::Uploading) {
                tracing::debug!(%upload_id, status = %old_status, "pause ignored");
                return;
            }

            task.pause();
            self.shared.publish_status(task, old_status);
            let handle = state.controllers.remove(&upload_id);
            (handle, old_status == UploadStatus::Uploading)
        };

        if let Some(handle) = handle {
            handle.abort(AbortReason::Pause);
        }
        self.shared.notify_observers();

        if was_uploading {
            if let Err(err) = self.shared.transport.pause(upload_id).await {
                tracing::warn!(%upload_id, error = %err, "pause notification failed, server state may diverge");
            }
        }
    }

    /// Restart a paused or failed task from zero bytes.
    ///
    /// The server is only told about tasks that already reached it. Returns
    /// once the new attempt has settled. Unknown ids are ignored.
    pub async fn resume_upload(&self, upload_id: UploadId) {
        let Some(task) = self.get(upload_id) else {
            tracing::debug!(%upload_id, "resume ignored, unknown upload");
            return;
        };
        if !matches!(task.status, UploadStatus::Paused | UploadStatus::Failed) {
            tracing::debug!(%upload_id, status = %task.status, "resume ignored");
            return;
        }

        if task.remote_id.is_some() {
            if let Err(err) = self.shared.transport.resume(upload_id).await {
                tracing::warn!(%upload_id, error = %err, "resume notification failed");
            }
        }

        self.upload_file(upload_id).await;
    }

    /// Abort a task and mark it `cancelled`. Settled tasks are left untouched.
    pub async fn cancel_upload(&self, upload_id: UploadId) {
        let (handle, notify) = {
            let mut state = self.shared.state.lock();
            let Some(task) = state.task_mut(upload_id) else {
                tracing::debug!(%upload_id, "cancel ignored, unknown upload");
                return;
            };

            let old_status = task.status;
            if old_status.is_terminal() {
                tracing::debug!(%upload_id, status = %old_status, "cancel ignored, upload already settled");
                return;
            }

            let notify = task.remote_id.is_some();
            task.cancel();
            self.shared.publish_status(task, old_status);
            let handle = state.controllers.remove(&upload_id);
            (handle, notify)
        };

        if let Some(handle) = handle {
            handle.abort(AbortReason::Cancel);
        }
        self.shared.notify_observers();

        if notify {
            self.notify_cancel(upload_id).await;
        }
    }

    /// Drop a task from the queue, aborting its transfer first.
    pub async fn remove_upload(&self, upload_id: UploadId) {
        let removed = {
            let mut state = self.shared.state.lock();
            match state.tasks.iter().position(|task| task.id == upload_id) {
                Some(index) => {
                    let task = state.tasks.remove(index);
                    let handle = state.controllers.remove(&upload_id);
                    self.shared.publish(UploadEvent::Removed { upload_id });
                    Some((task, handle))
                }
                None => None,
            }
        };

        let Some((task, handle)) = removed else {
            tracing::debug!(%upload_id, "remove ignored, unknown upload");
            return;
        };

        if let Some(handle) = handle {
            handle.abort(AbortReason::Remove);
        }
        self.shared.notify_observers();

        if Self::has_server_state(&task) {
            self.notify_cancel(upload_id).await;
        }
    }

    /// Empty the queue, aborting every active transfer.
    pub async fn clear(&self) {
        let (tasks, handles) = {
            let mut state = self.shared.state.lock();
            let tasks = std::mem::take(&mut state.tasks);
            let handles: Vec<AbortHandle> = state.controllers.drain().map(|(_, handle)| handle).collect();
            for task in &tasks {
                self.shared.publish(UploadEvent::Removed { upload_id: task.id });
            }
            (tasks, handles)
        };

        for handle in handles {
            handle.abort(AbortReason::Remove);
        }
        tracing::debug!(count = tasks.len(), "queue cleared");
        self.shared.notify_observers();

        join_all(
            tasks
                .iter()
                .filter(|task| Self::has_server_state(task))
                .map(|task| self.notify_cancel(task.id)),
        )
        .await;
    }

    /// Ordered snapshot for rendering.
    pub fn uploads(&self) -> Vec<UploadTask> {
        self.shared.state.lock().tasks.clone()
    }

    pub fn get(&self, upload_id: UploadId) -> Option<UploadTask> {
        self.shared
            .state
            .lock()
            .tasks
            .iter()
            .find(|task| task.id == upload_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> QueueSummary {
        let state = self.shared.state.lock();
        let mut summary = QueueSummary {
            total: state.tasks.len(),
            ..Default::default()
        };

        let mut progress_sum = 0u64;
        for task in &state.tasks {
            progress_sum += u64::from(task.progress);
            match task.status {
                UploadStatus::Queued => summary.queued += 1,
                UploadStatus::Uploading => summary.uploading += 1,
                UploadStatus::Paused => summary.paused += 1,
                UploadStatus::Completed => summary.completed += 1,
                UploadStatus::Failed => summary.failed += 1,
                UploadStatus::Cancelled => summary.cancelled += 1,
            }
        }

        if summary.total > 0 {
            summary.overall_progress = (progress_sum / summary.total as u64) as u8;
        }
        summary
    }

    /// Subscribe to queue events.
    ///
    /// - A receiver that falls `event_capacity` events behind gets a lagged error
    /// - Every subscriber gets its own copy of each event
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.shared.event_tx.subscribe(),
            filter,
        }
    }

    /// Events of a single task.
    pub fn subscribe_task(&self, upload_id: UploadId) -> FilteredEventReceiver<impl Fn(&UploadEvent) -> bool> {
        self.subscribe_filtered(move |event: &UploadEvent| event.upload_id() == upload_id)
    }

    fn has_server_state(task: &UploadTask) -> bool {
        task.remote_id.is_some() && !task.status.is_terminal()
    }

    async fn notify_cancel(&self, upload_id: UploadId) {
        if let Err(err) = self.shared.transport.cancel(upload_id).await {
            tracing::warn!(%upload_id, error = %err, "cancel notification failed, server state may diverge");
        }
    }

    fn spawn_transfer(&self, upload_id: UploadId, admission: Admission) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(
            async move { queue.run_transfer(upload_id, admission).await }
                .instrument(tracing::info_span!("transfer", %upload_id)),
        )
    }

    async fn run_transfer(self, upload_id: UploadId, admission: Admission) {
        let Some((attempt, abort_handle, payload)) = self.claim(upload_id, admission) else {
            return;
        };

        let permit = tokio::select! {
            biased;

            _ = abort_handle.aborted() => {
                tracing::debug!(reason = ?abort_handle.reason(), "aborted while waiting for a transfer slot");
                return;
            }
            permit = self.shared.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(err) => {
                    let reason = UploadError::internal_error(err.to_string()).failure_reason();
                    self.settle(upload_id, attempt, TransferOutcome::Failed(reason));
                    return;
                }
            },
        };

        if !self.begin(upload_id, attempt) {
            return;
        }

        let worker = TransferWorker {
            transport: self.shared.transport.clone(),
            abort_handle,
            timeout: self.shared.config.transfer_timeout,
        };
        let outcome = worker
            .run(upload_id, payload, |progress| self.record_progress(upload_id, attempt, progress))
            .await;

        // An aborted transfer was already moved to its new status by whoever aborted it
        if let Some(outcome) = outcome {
            self.settle(upload_id, attempt, outcome);
        }
        drop(permit);
    }

    /// Register an abort handle for a new attempt, requeueing paused or
    /// failed tasks. `None` when the task cannot start.
    fn claim(&self, upload_id: UploadId, admission: Admission) -> Option<(u64, AbortHandle, FilePayload)> {
        let claimed = {
            let mut state = self.shared.state.lock();
            if state.controllers.contains_key(&upload_id) {
                tracing::debug!("transfer already active");
                return None;
            }

            let Some(task) = state.task_mut(upload_id) else {
                tracing::debug!("upload no longer in the queue");
                return None;
            };
            let old_status = task.status;
            if !admission.admits(old_status) {
                tracing::debug!(status = %old_status, "upload not startable");
                return None;
            }

            task.requeue();
            self.shared.publish_status(task, old_status);
            let payload = task.payload.clone();

            let attempt = self.shared.next_attempt.fetch_add(1, Ordering::Relaxed);
            let abort_handle = AbortHandle::new(attempt);
            state.controllers.insert(upload_id, abort_handle.clone());

            (attempt, abort_handle, payload)
        };

        self.shared.notify_observers();
        Some(claimed)
    }

    fn begin(&self, upload_id: UploadId, attempt: u64) -> bool {
        {
            let mut state = self.shared.state.lock();
            if !state.owns(upload_id, attempt) {
                return false;
            }
            let Some(task) = state.task_mut(upload_id) else {
                return false;
            };

            let old_status = task.status;
            task.begin();
            self.shared.publish_status(task, old_status);
        }

        tracing::info!("upload started");
        self.shared.notify_observers();
        true
    }

    fn record_progress(&self, upload_id: UploadId, attempt: u64, progress: TransferProgress) {
        let Some(percent) = progress.percent() else {
            return;
        };

        {
            let mut state = self.shared.state.lock();
            if !state.owns(upload_id, attempt) {
                return;
            }
            let advanced = state
                .task_mut(upload_id)
                .is_some_and(|task| task.advance_progress(percent));
            if !advanced {
                return;
            }
            self.shared.publish(UploadEvent::Progress { upload_id, progress: percent });
        }

        self.shared.notify_observers();
    }

    /// Apply the outcome, unless a pause/cancel/remove already took over
    /// the task by removing its abort handle.
    fn settle(&self, upload_id: UploadId, attempt: u64, outcome: TransferOutcome) {
        {
            let mut state = self.shared.state.lock();
            if !state.release(upload_id, attempt) {
                tracing::debug!(?outcome, "transfer settled after being pre-empted");
                return;
            }
            let Some(task) = state.task_mut(upload_id) else {
                return;
            };

            let old_status = task.status;
            let old_progress = task.progress;
            match outcome {
                TransferOutcome::Completed(response) => {
                    tracing::info!(status = response.status, "upload completed");
                    task.complete();
                }
                TransferOutcome::Failed(reason) => {
                    tracing::warn!(%reason, "upload failed");
                    task.fail(reason);
                }
            }

            if task.progress > old_progress {
                self.shared.publish(UploadEvent::Progress {
                    upload_id,
                    progress: task.progress,
                });
            }
            self.shared.publish_status(task, old_status);
        }

        self.shared.notify_observers();
    }
}

/// Event receiver that skips events rejected by `filter`
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    pub async fn recv(&mut self) -> Result<UploadEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.filter)(&event) {
                return Ok(event);
            }
        }
    }
}
