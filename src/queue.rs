//! Per-job lifecycle and the observable translation queue.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::lang::LanguagePair;

/// Lifecycle of one chapter translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Queued,
    Running,
    Done,
    Failed,
}

impl JobState {
    /// True for states the control loop still has work to do for.
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::NotStarted | JobState::Queued | JobState::Running)
    }
}

/// Identity of one chapter: content source, series, chapter name. The
/// source component doubles as the concurrency group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChapterRef {
    pub source: String,
    pub manga: String,
    pub chapter: String,
}

impl ChapterRef {
    pub fn new(source: &str, manga: &str, chapter: &str) -> Self {
        Self {
            source: source.to_string(),
            manga: manga.to_string(),
            chapter: chapter.to_string(),
        }
    }
}

impl std::fmt::Display for ChapterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.manga, self.chapter)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub chapter: ChapterRef,
    pub languages: LanguagePair,
    pub state: JobState,
}

impl Job {
    pub fn new(chapter: ChapterRef, languages: LanguagePair) -> Self {
        Self {
            chapter,
            languages,
            state: JobState::Queued,
        }
    }
}

/// Ordered, duplicate-free job collection. Every mutation bumps a version
/// observable through [`TranslationQueue::subscribe`], so the control loop
/// can re-read a snapshot whenever anything changes.
pub struct TranslationQueue {
    jobs: Mutex<Vec<Job>>,
    version: watch::Sender<u64>,
}

impl Default for TranslationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationQueue {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            jobs: Mutex::new(Vec::new()),
            version,
        }
    }

    fn touch(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().expect("queue lock").clone()
    }

    pub fn contains(&self, chapter: &ChapterRef) -> bool {
        self.jobs
            .lock()
            .expect("queue lock")
            .iter()
            .any(|job| &job.chapter == chapter)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().expect("queue lock").is_empty()
    }

    pub fn has_pending(&self) -> bool {
        self.jobs
            .lock()
            .expect("queue lock")
            .iter()
            .any(|job| job.state.is_pending())
    }

    /// Append a job unless its chapter is already queued.
    pub fn push(&self, job: Job) -> bool {
        let added = {
            let mut jobs = self.jobs.lock().expect("queue lock");
            if jobs.iter().any(|existing| existing.chapter == job.chapter) {
                false
            } else {
                jobs.push(job);
                true
            }
        };
        if added {
            self.touch();
        }
        added
    }

    pub fn set_state(&self, chapter: &ChapterRef, state: JobState) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            let Some(job) = jobs.iter_mut().find(|job| &job.chapter == chapter) else {
                return;
            };
            if job.state == state {
                return;
            }
            job.state = state;
        }
        self.touch();
    }

    /// Mark a job done and drop it from the queue.
    pub fn finish(&self, chapter: &ChapterRef) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            jobs.retain(|job| &job.chapter != chapter);
        }
        self.touch();
    }

    pub fn fail(&self, chapter: &ChapterRef) {
        self.set_state(chapter, JobState::Failed);
    }

    /// A displaced worker's job goes back to the queue, not to a terminal
    /// state.
    pub fn requeue_running(&self, chapter: &ChapterRef) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            let Some(job) = jobs
                .iter_mut()
                .find(|job| &job.chapter == chapter && job.state == JobState::Running)
            else {
                return;
            };
            job.state = JobState::Queued;
        }
        self.touch();
    }

    fn transition_running(&self, state: JobState) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            for job in jobs.iter_mut().filter(|job| job.state == JobState::Running) {
                job.state = state;
            }
        }
        self.touch();
    }

    /// Stop semantics: in-flight work is unusable.
    pub fn fail_running(&self) {
        self.transition_running(JobState::Failed);
    }

    /// Pause semantics: in-flight work goes back to the queue.
    pub fn pause_running(&self) {
        self.transition_running(JobState::Queued);
    }

    /// Promote every job (including previously failed ones) back to Queued.
    /// Returns how many jobs are now pending.
    pub fn promote_pending(&self) -> usize {
        let pending = {
            let mut jobs = self.jobs.lock().expect("queue lock");
            for job in jobs.iter_mut() {
                if job.state != JobState::Done {
                    job.state = JobState::Queued;
                }
            }
            jobs.iter().filter(|job| job.state.is_pending()).count()
        };
        self.touch();
        pending
    }

    /// Remove matching jobs, resetting queued/running ones first.
    pub fn remove_matching(&self, predicate: impl Fn(&Job) -> bool) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            for job in jobs.iter_mut().filter(|job| predicate(job)) {
                if matches!(job.state, JobState::Queued | JobState::Running) {
                    job.state = JobState::NotStarted;
                }
            }
            jobs.retain(|job| !predicate(job));
        }
        self.touch();
    }

    pub fn clear(&self) {
        {
            let mut jobs = self.jobs.lock().expect("queue lock");
            for job in jobs.iter_mut() {
                if matches!(job.state, JobState::Queued | JobState::Running) {
                    job.state = JobState::NotStarted;
                }
            }
            jobs.clear();
        }
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{LanguagePair, ScriptLanguage};

    fn pair() -> LanguagePair {
        LanguagePair::new(ScriptLanguage::Japanese, "en").unwrap()
    }

    fn job(source: &str, chapter: &str) -> Job {
        Job::new(ChapterRef::new(source, "series", chapter), pair())
    }

    #[test]
    fn duplicate_chapters_are_rejected() {
        let queue = TranslationQueue::new();
        assert!(queue.push(job("src", "ch1")));
        assert!(!queue.push(job("src", "ch1")));
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[test]
    fn every_mutation_bumps_the_version() {
        let queue = TranslationQueue::new();
        let rx = queue.subscribe();
        let before = *rx.borrow();
        queue.push(job("src", "ch1"));
        queue.set_state(&ChapterRef::new("src", "series", "ch1"), JobState::Running);
        queue.fail_running();
        assert!(*rx.borrow() > before + 1);
    }

    #[test]
    fn promote_requeues_failed_jobs() {
        let queue = TranslationQueue::new();
        queue.push(job("src", "ch1"));
        queue.push(job("src", "ch2"));
        queue.set_state(&ChapterRef::new("src", "series", "ch1"), JobState::Failed);
        let pending = queue.promote_pending();
        assert_eq!(pending, 2);
        assert!(queue
            .snapshot()
            .iter()
            .all(|job| job.state == JobState::Queued));
    }

    #[test]
    fn pause_and_stop_treat_running_jobs_differently() {
        let queue = TranslationQueue::new();
        queue.push(job("src", "ch1"));
        queue.push(job("src", "ch2"));
        queue.set_state(&ChapterRef::new("src", "series", "ch1"), JobState::Running);
        queue.pause_running();
        assert_eq!(queue.snapshot()[0].state, JobState::Queued);

        queue.set_state(&ChapterRef::new("src", "series", "ch2"), JobState::Running);
        queue.fail_running();
        assert_eq!(queue.snapshot()[1].state, JobState::Failed);
    }

    #[test]
    fn finish_removes_the_job() {
        let queue = TranslationQueue::new();
        queue.push(job("src", "ch1"));
        queue.finish(&ChapterRef::new("src", "series", "ch1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_matching_resets_before_removal() {
        let queue = TranslationQueue::new();
        queue.push(job("a", "ch1"));
        queue.push(job("b", "ch2"));
        queue.remove_matching(|job| job.chapter.source == "a");
        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].chapter.source, "b");
    }
}
