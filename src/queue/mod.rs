use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::job::{Job, JobState};

/// Process-wide pipeline state: the processing slots plus the registry of
/// in-flight file ids, which doubles as the dedup set.
pub struct PipelineState {
    pool_size: usize,
    slots: Arc<Semaphore>,
    active: Mutex<HashMap<String, JobState>>,
    active_count: watch::Sender<usize>,
    failed: AtomicUsize,
}

impl PipelineState {
    pub fn new(pool_size: usize) -> Arc<Self> {
        let pool_size = pool_size.max(1);
        let (active_count, _) = watch::channel(0);
        Arc::new(Self {
            pool_size,
            slots: Arc::new(Semaphore::new(pool_size)),
            active: Mutex::new(HashMap::new()),
            active_count,
            failed: AtomicUsize::new(0),
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Slots not currently held by a job
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, JobState>> {
        // The map is only touched by short non-panicking sections
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `file_id`. Returns the number of jobs that were
    /// already in flight, or `None` if this id is one of them.
    fn register(&self, file_id: &str) -> Option<usize> {
        let mut active = self.registry();
        if active.contains_key(file_id) {
            return None;
        }
        let before = active.len();
        active.insert(file_id.to_string(), JobState::Submitted);
        self.active_count.send_replace(active.len());
        Some(before)
    }

    /// Forget `file_id`, returning the state it was last in
    fn release(&self, file_id: &str) -> Option<JobState> {
        let mut active = self.registry();
        let last = active.remove(file_id);
        if last.is_some() {
            self.active_count.send_replace(active.len());
        }
        last
    }

    /// Move a job along the state graph; invalid transitions are ignored
    pub fn transition(&self, file_id: &str, next: JobState) -> bool {
        let mut active = self.registry();
        match active.get_mut(file_id) {
            Some(current) if current.can_transition_to(next) => {
                debug!("{}: {:?} -> {:?}", file_id, current, next);
                *current = next;
                true
            }
            Some(current) => {
                debug!("Ignoring transition {:?} -> {:?} for {}", current, next, file_id);
                false
            }
            None => false,
        }
    }

    pub fn state_of(&self, file_id: &str) -> Option<JobState> {
        self.registry().get(file_id).copied()
    }

    pub fn is_active(&self, file_id: &str) -> bool {
        self.registry().contains_key(file_id)
    }

    /// Number of in-flight jobs, admitted or waiting
    pub fn active_count(&self) -> usize {
        *self.active_count.borrow()
    }

    pub fn count_in(&self, state: JobState) -> usize {
        self.registry().values().filter(|s| **s == state).count()
    }

    /// Jobs that ended without being delivered, including panicked and aborted ones
    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Resolve once no job is in flight
    pub async fn wait_idle(&self) {
        let mut count = self.active_count.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = count.wait_for(|n| *n == 0).await;
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was free when the job was submitted
    Immediate,
    /// Jobs ahead of this one when it was submitted, best effort
    Queued { position: usize },
    /// The file id is already in flight; the submission was dropped
    Duplicate,
}

/// Permission to run the critical section for one job.
///
/// Dropping the slot gives the permit back and clears the job's dedup
/// entry, whichever way the job ends.
pub struct ProcessingSlot {
    _permit: OwnedSemaphorePermit,
    file_id: String,
    state: Arc<PipelineState>,
}

impl ProcessingSlot {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn state(&self) -> Option<JobState> {
        self.state.state_of(&self.file_id)
    }

    pub fn mark(&self, next: JobState) -> bool {
        self.state.transition(&self.file_id, next)
    }
}

impl Drop for ProcessingSlot {
    fn drop(&mut self) {
        let last = self.state.release(&self.file_id);
        if last != Some(JobState::Done) {
            self.state.failed.fetch_add(1, Ordering::SeqCst);
        }
        debug!("Released processing slot for {} ({:?})", self.file_id, last);
    }
}

/// Runs an admitted job to completion
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job, slot: ProcessingSlot);
}

/// FIFO admission in front of a fixed pool of processing slots
pub struct JobQueue {
    state: Arc<PipelineState>,
    sender: mpsc::UnboundedSender<Job>,
    stop: watch::Sender<bool>,
    running: Arc<Mutex<JoinSet<()>>>,
    dispatcher: JoinHandle<()>,
}

impl JobQueue {
    /// Spawn the dispatcher; must be called inside a tokio runtime
    pub fn start(state: Arc<PipelineState>, handler: Arc<dyn JobHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let running = Arc::new(Mutex::new(JoinSet::new()));
        let dispatcher = tokio::spawn(dispatch(
            state.clone(),
            handler,
            receiver,
            stop_rx,
            running.clone(),
        ));
        Self {
            state,
            sender,
            stop,
            running,
            dispatcher,
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    /// Submit a job for processing
    pub fn submit(&self, job: Job) -> Result<Admission> {
        let Some(active_before) = self.state.register(&job.file_id) else {
            debug!("Dropping duplicate submission for {}", job.file_id);
            return Ok(Admission::Duplicate);
        };

        let position = (active_before + 1).saturating_sub(self.state.pool_size);
        let file_id = job.file_id.clone();
        let file_name = job.file_name.clone();

        if self.sender.send(job).is_err() {
            self.state.release(&file_id);
            return Err(anyhow!("Job queue is closed"));
        }

        if position == 0 {
            info!("📥 Admitted {}", file_name);
            Ok(Admission::Immediate)
        } else {
            info!("⏳ Queued {} at position {}", file_name, position);
            Ok(Admission::Queued { position })
        }
    }

    pub async fn wait_idle(&self) {
        self.state.wait_idle().await
    }

    /// Stop admitting jobs. Jobs still waiting for a slot are dropped;
    /// jobs already holding one keep running.
    pub fn cancel_pending(&self) {
        if !self.stop.send_replace(true) {
            info!("🛑 No further jobs will be started");
        }
    }

    /// Cancel pending jobs and abort the running ones, then wait for their
    /// slots to come back. Aborted jobs drop their child processes and
    /// scratch files on the way out.
    pub async fn abort_running(&self) {
        self.cancel_pending();
        let aborted = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let aborted = running.len();
            running.abort_all();
            aborted
        };
        warn!("🛑 Aborting {} running job(s)", aborted);
        self.state.wait_idle().await;
    }

    /// Stop accepting jobs and wait until every submitted job has finished
    pub async fn shutdown(self) {
        let Self {
            state,
            sender,
            stop: _stop,
            running: _running,
            dispatcher,
        } = self;
        drop(sender);
        if let Err(e) = dispatcher.await {
            error!("Dispatcher task failed: {}", e);
        }
        state.wait_idle().await;
    }
}

/// Resolves with `true` once a stop is requested; `false` if it never can be
async fn stop_requested(stop: &mut watch::Receiver<bool>) -> bool {
    stop.wait_for(|stopped| *stopped).await.is_ok()
}

async fn dispatch(
    state: Arc<PipelineState>,
    handler: Arc<dyn JobHandler>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    mut stop: watch::Receiver<bool>,
    running: Arc<Mutex<JoinSet<()>>>,
) {
    let mut dropped = 0;

    // Permits are taken one job at a time, which keeps admission in submission order
    loop {
        let job = tokio::select! {
            biased;
            true = stop_requested(&mut stop) => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            true = stop_requested(&mut stop) => {
                state.release(&job.file_id);
                dropped += 1;
                break;
            }
            permit = state.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Processing slots unavailable: {}", e);
                    state.release(&job.file_id);
                    continue;
                }
            },
        };

        let mut running = running.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so an abort cannot miss a job spawned concurrently
        if *stop.borrow() {
            state.release(&job.file_id);
            dropped += 1;
            break;
        }
        while running.try_join_next().is_some() {}

        let slot = ProcessingSlot {
            _permit: permit,
            file_id: job.file_id.clone(),
            state: state.clone(),
        };
        slot.mark(JobState::Admitted);

        let handler = handler.clone();
        running.spawn(async move {
            handler.handle(job, slot).await;
        });
    }

    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        state.release(&job.file_id);
        dropped += 1;
    }
    if dropped > 0 {
        info!("🗑️ Dropped {} queued job(s) that had not started", dropped);
    }
    debug!("Job queue closed");
}
