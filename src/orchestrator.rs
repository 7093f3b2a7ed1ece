//! Reactive job orchestrator: on every queue change it recomputes the
//! active set (at most `jobs_per_source` per source group, at most
//! `max_source_groups` groups), diffs it against the running workers, and
//! cancels or spawns accordingly. A failed job shuts the whole run down so
//! an errored chapter is never reported as translated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::lang::LanguagePair;
use crate::pipeline::{WorkerContext, run_job};
use crate::queue::{ChapterRef, Job, JobState, TranslationQueue};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How many distinct source groups may run concurrently.
    pub max_source_groups: usize,
    /// Concurrent jobs admitted per source group.
    pub jobs_per_source: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_source_groups: 5,
            jobs_per_source: 1,
        }
    }
}

type WorkerMap = Arc<Mutex<HashMap<ChapterRef, JoinHandle<()>>>>;

pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    config: OrchestratorConfig,
    workers: WorkerMap,
    control: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(ctx: WorkerContext, config: OrchestratorConfig) -> Self {
        Self {
            ctx: Arc::new(ctx),
            config,
            workers: Arc::new(Mutex::new(HashMap::new())),
            control: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> Arc<TranslationQueue> {
        self.ctx.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .expect("control lock")
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Queue a chapter unless it is already queued or already translated.
    pub fn enqueue(&self, chapter: ChapterRef, languages: LanguagePair) -> bool {
        if self.ctx.store.exists(&chapter) {
            return false;
        }
        self.ctx.queue.push(Job::new(chapter, languages))
    }

    /// Promote everything pending and launch the control loop. Returns
    /// whether any job was actually (re)activated.
    pub fn start(&self) -> bool {
        if self.is_running() || self.ctx.queue.is_empty() {
            return false;
        }
        let pending = self.ctx.queue.promote_pending();
        let handle = tokio::spawn(control_loop(
            self.ctx.clone(),
            self.workers.clone(),
            self.config.clone(),
        ));
        *self.control.lock().expect("control lock") = Some(handle);
        pending > 0
    }

    /// Halt without losing queued work; in-flight jobs go back to Queued.
    pub fn pause(&self) {
        self.halt();
        self.ctx.queue.pause_running();
    }

    /// Halt; in-flight jobs are unusable and become Failed.
    pub fn stop(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            warn!("translation run stopped: {}", reason);
        }
        self.halt();
        self.ctx.queue.fail_running();
    }

    /// Halt and reset the queue entirely.
    pub fn clear_queue(&self) {
        self.halt();
        self.ctx.queue.clear();
    }

    /// Remove matching jobs; their workers are cancelled by the control
    /// loop as soon as the queue change lands.
    pub fn remove_matching(&self, predicate: impl Fn(&Job) -> bool) {
        self.ctx.queue.remove_matching(predicate);
    }

    /// Wait for the current run to finish.
    pub async fn join(&self) {
        let handle = self.control.lock().expect("control lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn halt(&self) {
        if let Some(handle) = self.control.lock().expect("control lock").take() {
            handle.abort();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().expect("workers lock");
            workers
                .drain()
                .map(|(_, handle)| {
                    handle.abort();
                    handle
                })
                .collect()
        };
        // Aborting is asynchronous; dropping the handles is enough here
        // because aborted workers never touch the queue again.
        drop(handles);
    }
}

/// Pick up to `jobs_per_source` pending jobs from each of the first
/// `max_source_groups` source groups, preserving queue order.
fn active_set(snapshot: &[Job], config: &OrchestratorConfig) -> Vec<Job> {
    let mut groups: Vec<(&str, Vec<&Job>)> = Vec::new();
    for job in snapshot.iter().filter(|job| job.state.is_pending()) {
        match groups
            .iter_mut()
            .find(|(source, _)| *source == job.chapter.source)
        {
            Some((_, jobs)) => jobs.push(job),
            None => groups.push((&job.chapter.source, vec![job])),
        }
    }
    groups
        .into_iter()
        .take(config.max_source_groups)
        .flat_map(|(_, jobs)| {
            jobs.into_iter()
                .take(config.jobs_per_source)
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect()
}

async fn control_loop(ctx: Arc<WorkerContext>, workers: WorkerMap, config: OrchestratorConfig) {
    let mut changes = ctx.queue.subscribe();
    loop {
        let snapshot = ctx.queue.snapshot();

        // Fail-fast: one failed job poisons the whole run.
        if snapshot.iter().any(|job| job.state == JobState::Failed) {
            shutdown_workers(&workers).await;
            ctx.queue.fail_running();
            info!("translation run stopped after a failed job");
            break;
        }

        if !snapshot.iter().any(|job| job.state.is_pending()) {
            shutdown_workers(&workers).await;
            info!("translation run finished");
            break;
        }

        let active = active_set(&snapshot, &config);
        let to_start: Vec<Job> = {
            let mut workers = workers.lock().expect("workers lock");
            workers.retain(|chapter, handle| {
                if handle.is_finished() {
                    return false;
                }
                if active.iter().any(|job| &job.chapter == chapter) {
                    return true;
                }
                handle.abort();
                ctx.queue.requeue_running(chapter);
                false
            });
            active
                .into_iter()
                .filter(|job| !workers.contains_key(&job.chapter))
                .collect()
        };
        for job in to_start {
            ctx.queue.set_state(&job.chapter, JobState::Running);
            let mut running = job.clone();
            running.state = JobState::Running;
            let handle = tokio::spawn(run_job(ctx.clone(), running));
            workers
                .lock()
                .expect("workers lock")
                .insert(job.chapter, handle);
        }

        if changes.changed().await.is_err() {
            break;
        }
    }
}

async fn shutdown_workers(workers: &WorkerMap) {
    let handles: Vec<JoinHandle<()>> = {
        let mut workers = workers.lock().expect("workers lock");
        workers
            .drain()
            .map(|(_, handle)| {
                handle.abort();
                handle
            })
            .collect()
    };
    join_all(handles).await;
}
