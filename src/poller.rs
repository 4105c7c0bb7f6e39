//! Submit-then-poll driver for batch image generation jobs.
//!
//! A job is submitted once, then its status endpoint is polled on a fixed
//! cadence until it reports `completed` or `failed`. Each poll loop owns a
//! [`PollHandle`]; the loop cancels it exactly once when it stops, and
//! callers cancel it to abandon a job they no longer care about.

use crate::backend::GenerationBackend;
use crate::error::{JobError, JobErrorKind, StudioError};
use crate::models::{Artifact, GenerationRequest, JobStatus, StatusResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cancellation handle for one poll loop.
#[derive(Debug, Clone, Default)]
pub struct PollHandle {
    token: CancellationToken,
}

impl PollHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total: u32,
    pub completed: u32,
    pub partial_results: Vec<Artifact>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, total: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            total,
            completed: 0,
            partial_results: Vec::new(),
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// Folds one poll response into the job. Returns true once the job has
    /// reached a terminal state.
    pub fn apply(&mut self, response: StatusResponse) -> bool {
        self.updated_at = Utc::now();
        match response.status {
            JobStatus::Pending | JobStatus::Processing => {
                self.status = JobStatus::Processing;
                // Only the count moves while processing; artifacts arrive
                // with the terminal response.
                self.completed = self.completed.max(response.completed);
                false
            }
            JobStatus::Completed => {
                self.status = JobStatus::Completed;
                self.partial_results = response.generated_images;
                self.total = self.total.max(self.partial_results.len() as u32);
                self.completed = self.total;
                true
            }
            JobStatus::Failed => {
                self.status = JobStatus::Failed;
                self.partial_results = response.generated_images;
                self.completed = self
                    .completed
                    .max(response.completed)
                    .max(self.partial_results.len() as u32);
                self.errors.extend(response.errors);
                true
            }
        }
    }

    pub fn failure_message(&self) -> String {
        if self.errors.is_empty() {
            format!(
                "image generation failed after {} of {} images",
                self.completed, self.total
            )
        } else {
            self.errors.join("; ")
        }
    }

    fn into_error(self, kind: JobErrorKind, message: String) -> StudioError {
        StudioError::Job(JobError {
            kind,
            message,
            partial: self.partial_results,
        })
    }
}

/// Receives every job snapshot the poll loop produces.
pub trait JobObserver: Send + Sync {
    fn job_updated(&self, job: &Job);
}

impl JobObserver for watch::Sender<Job> {
    fn job_updated(&self, job: &Job) {
        self.send_replace(job.clone());
    }
}

#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
}

impl JobPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Submits the job. The backend must hand back a task id.
    pub async fn start<B>(&self, backend: &B, request: &GenerationRequest) -> Result<Job, StudioError>
    where
        B: GenerationBackend + ?Sized,
    {
        let response = backend.submit_generation(request).await?;
        let task_id = response
            .task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(StudioError::NoJobId)?;
        info!(target = "studio.poller", task_id = %task_id, total = response.total_images, "generation job submitted");
        Ok(Job::new(task_id, response.total_images))
    }

    /// Polls until the job is terminal, the handle is cancelled, or a poll
    /// request fails. On success the job's final artifacts are returned; every
    /// failure carries whatever artifacts had arrived.
    pub async fn run<B, O>(
        &self,
        backend: &B,
        mut job: Job,
        handle: &PollHandle,
        observer: &O,
    ) -> Result<Vec<Artifact>, StudioError>
    where
        B: GenerationBackend + ?Sized,
        O: JobObserver + ?Sized,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the first poll waits one interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = handle.cancelled() => return Err(abandoned(job)),
                _ = ticker.tick() => {}
            }

            let task_id = job.id.clone();
            let polled = tokio::select! {
                biased;
                _ = handle.cancelled() => return Err(abandoned(job)),
                polled = backend.poll_generation_status(&task_id) => polled,
            };

            let response = match polled {
                Ok(response) => response,
                Err(err) => {
                    handle.cancel();
                    warn!(target = "studio.poller", task_id = %job.id, error = %err, "status poll failed; giving up on job");
                    let message = format!("status poll failed: {err}");
                    return Err(job.into_error(JobErrorKind::Transport, message));
                }
            };

            let terminal = job.apply(response);
            crate::metrics::poll_tick(&job.id, job.completed, job.total);
            observer.job_updated(&job);

            if !terminal {
                debug!(target = "studio.poller", task_id = %job.id, completed = job.completed, total = job.total, "job still processing");
                continue;
            }

            handle.cancel();
            return match job.status {
                JobStatus::Completed => {
                    info!(target = "studio.poller", task_id = %job.id, images = job.partial_results.len(), "generation job completed");
                    Ok(job.partial_results)
                }
                _ => {
                    let message = job.failure_message();
                    warn!(target = "studio.poller", task_id = %job.id, partial = job.partial_results.len(), error = %message, "generation job failed");
                    Err(job.into_error(JobErrorKind::Failed, message))
                }
            };
        }
    }
}

fn abandoned(job: Job) -> StudioError {
    info!(target = "studio.poller", task_id = %job.id, "polling abandoned");
    let message = format!("polling for job {} was abandoned", job.id);
    job.into_error(JobErrorKind::Abandoned, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    struct ScriptedBackend {
        submit: Mutex<Option<crate::models::SubmitResponse>>,
        polls: Mutex<VecDeque<Result<StatusResponse, StudioError>>>,
        poll_count: Mutex<usize>,
    }

    impl ScriptedBackend {
        fn new(polls: Vec<Result<StatusResponse, StudioError>>) -> Self {
            Self {
                submit: Mutex::new(None),
                polls: Mutex::new(polls.into()),
                poll_count: Mutex::new(0),
            }
        }

        fn polls_made(&self) -> usize {
            *self.poll_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn submit_generation(
            &self,
            _request: &GenerationRequest,
        ) -> Result<crate::models::SubmitResponse, StudioError> {
            Ok(self.submit.lock().unwrap().take().unwrap())
        }

        async fn poll_generation_status(
            &self,
            _task_id: &str,
        ) -> Result<StatusResponse, StudioError> {
            *self.poll_count.lock().unwrap() += 1;
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(StudioError::Transport("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<Job>>,
    }

    impl JobObserver for Recorder {
        fn job_updated(&self, job: &Job) {
            self.updates.lock().unwrap().push(job.clone());
        }
    }

    fn status(status: JobStatus, completed: u32, images: &[&str], errors: &[&str]) -> StatusResponse {
        StatusResponse {
            status,
            completed,
            generated_images: images.iter().map(|s| Artifact::from(*s)).collect(),
            errors: errors.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            photos: vec!["https://img/a.jpg".into()],
            categories: BTreeMap::new(),
            prompt_modifier: None,
            image_type: Default::default(),
        }
    }

    fn poller() -> JobPoller {
        JobPoller::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn start_requires_task_id() {
        let backend = ScriptedBackend::new(vec![]);
        *backend.submit.lock().unwrap() = Some(crate::models::SubmitResponse {
            task_id: Some("  ".into()),
            total_images: 3,
        });
        let err = poller().start(&backend, &request()).await.unwrap_err();
        assert!(matches!(err, StudioError::NoJobId));

        *backend.submit.lock().unwrap() = Some(crate::models::SubmitResponse {
            task_id: Some("task-9".into()),
            total_images: 3,
        });
        let job = poller().start(&backend, &request()).await.unwrap();
        assert_eq!(job.id, "task-9");
        assert_eq!(job.total, 3);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn completed_job_emits_one_terminal_update_and_stops() {
        let backend = ScriptedBackend::new(vec![
            Ok(status(JobStatus::Processing, 1, &["g1"], &[])),
            Ok(status(JobStatus::Processing, 0, &[], &[])),
            Ok(status(JobStatus::Completed, 2, &["g1", "g2"], &[])),
            Ok(status(JobStatus::Completed, 2, &["g1", "g2"], &[])),
        ]);
        let recorder = Recorder::default();
        let handle = PollHandle::new();
        let results = poller()
            .run(&backend, Job::new("t", 2), &handle, &recorder)
            .await
            .unwrap();
        assert_eq!(results, vec![Artifact::from("g1"), Artifact::from("g2")]);
        assert!(handle.is_cancelled());
        assert_eq!(backend.polls_made(), 3);

        let updates = recorder.updates.lock().unwrap();
        assert_eq!(updates.iter().filter(|j| j.is_terminal()).count(), 1);
        // completed never goes backwards while processing
        assert_eq!(updates[1].completed, 1);
        let last = updates.last().unwrap();
        assert_eq!(last.completed, last.total);
    }

    #[tokio::test]
    async fn failed_job_keeps_partial_results_and_joins_errors() {
        let backend = ScriptedBackend::new(vec![Ok(status(
            JobStatus::Failed,
            1,
            &["g1"],
            &["image 2 rejected", "image 3 timed out"],
        ))]);
        let handle = PollHandle::new();
        let err = poller()
            .run(&backend, Job::new("t", 3), &handle, &Recorder::default())
            .await
            .unwrap_err();
        let StudioError::Job(job_err) = err else {
            panic!("expected job error");
        };
        assert_eq!(job_err.kind, JobErrorKind::Failed);
        assert_eq!(job_err.message, "image 2 rejected; image 3 timed out");
        assert_eq!(job_err.partial, vec![Artifact::from("g1")]);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn failed_job_without_errors_reports_counts() {
        let backend = ScriptedBackend::new(vec![
            Ok(status(JobStatus::Processing, 1, &["g1"], &[])),
            Ok(status(JobStatus::Failed, 1, &[], &[])),
        ]);
        let err = poller()
            .run(&backend, Job::new("t", 2), &PollHandle::new(), &Recorder::default())
            .await
            .unwrap_err();
        let StudioError::Job(job_err) = err else {
            panic!("expected job error");
        };
        // The failed response carried no artifacts, so nothing from the
        // processing poll is handed back.
        assert!(job_err.partial.is_empty());
        assert_eq!(job_err.message, "image generation failed after 1 of 2 images");
    }

    #[tokio::test]
    async fn transport_error_stops_polling() {
        let backend = ScriptedBackend::new(vec![
            Ok(status(JobStatus::Processing, 1, &["g1"], &[])),
            Err(StudioError::Transport("connection refused".into())),
            Ok(status(JobStatus::Completed, 2, &["g1", "g2"], &[])),
        ]);
        let handle = PollHandle::new();
        let err = poller()
            .run(&backend, Job::new("t", 2), &handle, &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StudioError::Job(JobError { kind: JobErrorKind::Transport, ref partial, .. }) if partial.is_empty()
        ));
        assert_eq!(backend.polls_made(), 2);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_handle_abandons_without_polling() {
        let backend = ScriptedBackend::new(vec![]);
        let handle = PollHandle::new();
        handle.cancel();
        let err = poller()
            .run(&backend, Job::new("t", 1), &handle, &Recorder::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StudioError::Job(JobError { kind: JobErrorKind::Abandoned, .. })
        ));
        assert_eq!(backend.polls_made(), 0);
    }

    #[test]
    fn processing_updates_count_only() {
        let mut job = Job::new("t", 3);
        assert!(!job.apply(status(JobStatus::Processing, 2, &["g1", "g2"], &[])));
        assert_eq!(job.completed, 2);
        assert!(job.partial_results.is_empty());

        assert!(job.apply(status(JobStatus::Failed, 2, &["g1"], &["quota"])));
        assert_eq!(job.partial_results, vec![Artifact::from("g1")]);
        assert_eq!(job.completed, 2);
    }

    #[test]
    fn completed_with_unknown_total_uses_result_count() {
        let mut job = Job::new("t", 0);
        assert!(job.apply(status(JobStatus::Completed, 0, &["a", "b"], &[])));
        assert_eq!(job.total, 2);
        assert_eq!(job.completed, 2);
    }
}
