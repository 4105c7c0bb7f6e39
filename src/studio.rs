//! Per-session orchestration of the listing flows.
//!
//! A session owns the working photo list, the selection sets, the merged
//! output list and the progress of whatever flow ran last. Streamed flows and
//! generation jobs run on spawned tasks so a dropped HTTP request never leaves
//! a session half-updated; the handler only awaits the result.

use crate::backend::StudioBackend;
use crate::error::{JobErrorKind, StudioError};
use crate::events::{EventStream, StreamOutcome};
use crate::merge::{
    OutputList, apply_regenerated, carry_regen_selection, merge, regeneration_sources,
};
use crate::models::{
    Artifact, CreateListingRequest, GenerationRequest, ImageType, ListingSummary, PhotosPayload,
    UploadResult, listing_id_from_input,
};
use crate::poller::{Job, JobPoller, PollHandle};
use crate::reorder::{MovePolicy, SelectedIndices, move_item, remove_item};
use crate::selection::{SelectionKind, SelectionState};
use crate::steps::{StepProgress, StepTracker, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
    time::Instant,
};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Regenerate,
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Generate => "image generation",
            JobKind::Regenerate => "image regeneration",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub image_type: ImageType,
    #[serde(default)]
    pub prompt_modifier: Option<String>,
}

struct ActiveJob {
    kind: JobKind,
    handle: PollHandle,
    updates: watch::Receiver<Job>,
    running: bool,
}

#[derive(Default)]
struct Session {
    sku: Option<String>,
    listing: Option<ListingSummary>,
    working: Vec<String>,
    categories: BTreeMap<String, Option<String>>,
    selection: SelectionState,
    output: OutputList,
    selected: SelectedIndices,
    workflow: Option<Workflow>,
    tracker: StepTracker,
    busy: Option<&'static str>,
    /// Handle of a job whose submission is still in flight.
    submitting: Option<PollHandle>,
    job: Option<ActiveJob>,
    job_error: Option<String>,
    unmatched: Vec<String>,
    unfilled: Vec<usize>,
    created_listing: Option<Value>,
    upload_result: Option<UploadResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub sku: Option<String>,
    pub listing: Option<ListingSummary>,
    pub working: Vec<String>,
    pub categories: BTreeMap<String, Option<String>>,
    pub selection: SelectionState,
    pub output: OutputList,
    pub selected: SelectedIndices,
    pub workflow: Option<Workflow>,
    pub progress: StepProgress,
    pub busy: Option<&'static str>,
    pub job_kind: Option<JobKind>,
    pub job: Option<Job>,
    pub job_running: bool,
    pub job_error: Option<String>,
    pub unmatched: Vec<String>,
    pub unfilled: Vec<usize>,
    pub created_listing: Option<Value>,
    pub upload_result: Option<UploadResult>,
}

impl Session {
    fn snapshot(&self, id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            id,
            sku: self.sku.clone(),
            listing: self.listing.clone(),
            working: self.working.clone(),
            categories: self.categories.clone(),
            selection: self.selection.clone(),
            output: self.output.clone(),
            selected: self.selected.clone(),
            workflow: self.workflow,
            progress: self.tracker.progress().clone(),
            busy: self.busy,
            job_kind: self.job.as_ref().map(|job| job.kind),
            job: self.job.as_ref().map(|job| job.updates.borrow().clone()),
            job_running: self.job_running(),
            job_error: self.job_error.clone(),
            unmatched: self.unmatched.clone(),
            unfilled: self.unfilled.clone(),
            created_listing: self.created_listing.clone(),
            upload_result: self.upload_result.clone(),
        }
    }

    fn job_running(&self) -> bool {
        self.job.as_ref().is_some_and(|job| job.running)
    }

    fn ensure_no_job(&self) -> Result<(), StudioError> {
        match &self.job {
            Some(job) if job.running => Err(StudioError::Busy(job.kind.label())),
            _ => Ok(()),
        }
    }

    fn ensure_idle(&self) -> Result<(), StudioError> {
        if let Some(flow) = self.busy {
            return Err(StudioError::Busy(flow));
        }
        self.ensure_no_job()
    }

    fn begin_submission(&mut self, kind: JobKind) -> PollHandle {
        let handle = PollHandle::new();
        self.busy = Some(kind.label());
        self.submitting = Some(handle.clone());
        handle
    }

    fn cancel_job(&self) -> bool {
        if let Some(handle) = &self.submitting {
            handle.cancel();
            return true;
        }
        match &self.job {
            Some(job) if job.running => {
                job.handle.cancel();
                true
            }
            _ => false,
        }
    }

    fn load(&mut self, payload: PhotosPayload) {
        self.sku = payload.sku;
        self.listing = payload.listing;
        self.working = payload.photos;
        self.categories = payload.categories;
        self.selection = SelectionState::default();
        self.output = OutputList::default();
        self.selected = SelectedIndices::default();
        self.job = None;
        self.job_error = None;
        self.unmatched.clear();
        self.unfilled.clear();
        self.created_listing = None;
        self.upload_result = None;
    }

    fn generation_request(&self, photos: Vec<String>, options: GenerationOptions) -> GenerationRequest {
        let categories = photos
            .iter()
            .map(|photo| {
                let label = self.categories.get(photo).cloned().flatten();
                (photo.clone(), label)
            })
            .collect();
        GenerationRequest {
            photos,
            categories,
            prompt_modifier: options.prompt_modifier.filter(|m| !m.trim().is_empty()),
            image_type: options.image_type,
        }
    }

    fn apply_merge(&mut self, working: &[String], selection: &SelectionState, processed: &[Artifact]) {
        match merge(working, selection, processed) {
            Ok(report) => {
                self.selected = carry_regen_selection(working, selection, &report.output);
                if report.is_partial() {
                    self.job_error = Some(format!(
                        "{} item(s) were not generated",
                        report.unmatched.len()
                    ));
                }
                self.output = report.output;
                self.unmatched = report.unmatched;
                self.unfilled.clear();
            }
            Err(err) => self.job_error = Some(err.to_string()),
        }
    }

    fn finish_generation(
        &mut self,
        working: &[String],
        selection: &SelectionState,
        outcome: Result<Vec<Artifact>, StudioError>,
    ) {
        match split_outcome(outcome) {
            Ok((artifacts, failure)) => {
                self.job_error = None;
                self.apply_merge(working, selection, &artifacts);
                if failure.is_some() {
                    self.job_error = failure;
                }
            }
            Err(message) => self.job_error = Some(message),
        }
    }

    fn finish_regeneration(
        &mut self,
        selected: &SelectedIndices,
        outcome: Result<Vec<Artifact>, StudioError>,
    ) {
        let (artifacts, failure) = match split_outcome(outcome) {
            Ok(split) => split,
            Err(message) => {
                self.job_error = Some(message);
                return;
            }
        };
        match apply_regenerated(&self.output, selected, &artifacts) {
            Ok(report) => {
                self.output = report.output;
                // Positions that got nothing stay selected for another attempt.
                self.selected = report.unfilled.iter().copied().collect();
                self.job_error = failure.or_else(|| {
                    (!report.unfilled.is_empty()).then(|| {
                        format!("{} position(s) were not regenerated", report.unfilled.len())
                    })
                });
                self.unfilled = report.unfilled;
            }
            Err(err) => self.job_error = Some(err.to_string()),
        }
    }
}

/// Separates the artifacts a job produced from its failure message.
/// Abandoned jobs and non-job errors yield no artifacts at all.
fn split_outcome(
    outcome: Result<Vec<Artifact>, StudioError>,
) -> Result<(Vec<Artifact>, Option<String>), String> {
    match outcome {
        Ok(artifacts) => Ok((artifacts, None)),
        Err(StudioError::Job(err)) if err.kind != JobErrorKind::Abandoned => {
            Ok((err.partial, Some(err.message)))
        }
        Err(err) => Err(err.to_string()),
    }
}

pub struct Studio {
    backend: Arc<dyn StudioBackend>,
    poller: JobPoller,
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

impl Studio {
    pub fn new(backend: Arc<dyn StudioBackend>, poller: JobPoller) -> Self {
        Self {
            backend,
            poller,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .lock()
            .await
            .insert(id, Arc::new(Mutex::new(Session::default())));
        info!(target = "studio.session", session = %id, "session created");
        id
    }

    async fn session(&self, id: Uuid) -> Result<Arc<Mutex<Session>>, StudioError> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StudioError::SessionNotFound)
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let guard = session.lock().await;
        Ok(guard.snapshot(id))
    }

    pub async fn delete_session(&self, id: Uuid) -> Result<(), StudioError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(&id)
            .ok_or(StudioError::SessionNotFound)?;
        session.lock().await.cancel_job();
        info!(target = "studio.session", session = %id, "session deleted");
        Ok(())
    }

    pub async fn fetch_photos(
        &self,
        id: Uuid,
        listing_ref: &str,
    ) -> Result<SessionSnapshot, StudioError> {
        let listing_id = listing_id_from_input(listing_ref)?;
        let session = self.session(id).await?;
        let backend = self.backend.clone();
        let open = async move { backend.fetch_photos(&listing_id).await };
        self.run_streamed(session.clone(), Workflow::FetchPhotos, open, |s, data| {
            let data = data.ok_or_else(|| {
                StudioError::InvalidResponse("photo fetch finished without a result".into())
            })?;
            let payload: PhotosPayload = serde_json::from_value(data)
                .map_err(|err| StudioError::InvalidResponse(err.to_string()))?;
            s.load(payload);
            Ok(())
        })
        .await?;
        let guard = session.lock().await;
        Ok(guard.snapshot(id))
    }

    pub async fn toggle(
        &self,
        id: Uuid,
        kind: SelectionKind,
        key: &str,
    ) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let mut s = session.lock().await;
        if !s.working.iter().any(|item| item == key) {
            return Err(StudioError::InvalidInput(format!("`{key}` is not a working item")));
        }
        s.selection = s.selection.toggle(kind, key);
        Ok(s.snapshot(id))
    }

    /// Submits a generation job for every item that is neither skipped nor
    /// kept as original. Returns `None` when nothing needs generating; the
    /// output list is then built from the originals right away.
    pub async fn start_generation(
        &self,
        id: Uuid,
        options: GenerationOptions,
    ) -> Result<Option<Job>, StudioError> {
        let session = self.session(id).await?;
        let (request, handle, working, selection) = {
            let mut s = session.lock().await;
            s.ensure_idle()?;
            s.selection.ensure_runnable(&s.working)?;
            let photos: Vec<String> = s
                .selection
                .pending(&s.working)
                .into_iter()
                .map(str::to_string)
                .collect();
            let working = s.working.clone();
            let selection = s.selection.clone();
            if photos.is_empty() {
                s.job_error = None;
                s.apply_merge(&working, &selection, &[]);
                return Ok(None);
            }
            let request = s.generation_request(photos, options);
            let handle = s.begin_submission(JobKind::Generate);
            (request, handle, working, selection)
        };
        let job = self
            .launch_job(session, JobKind::Generate, request, handle, move |s, outcome| {
                s.finish_generation(&working, &selection, outcome)
            })
            .await?;
        Ok(Some(job))
    }

    /// Regenerates the artifacts at the selected output positions.
    pub async fn start_regeneration(
        &self,
        id: Uuid,
        options: GenerationOptions,
    ) -> Result<Job, StudioError> {
        let session = self.session(id).await?;
        let (request, handle, selected) = {
            let mut s = session.lock().await;
            s.ensure_idle()?;
            if s.selected.is_empty() {
                return Err(StudioError::InvalidInput(
                    "no output positions selected for regeneration".into(),
                ));
            }
            let photos = regeneration_sources(&s.output, &s.selected)?
                .into_iter()
                .map(|artifact| artifact.0)
                .collect();
            let request = s.generation_request(photos, options);
            let handle = s.begin_submission(JobKind::Regenerate);
            (request, handle, s.selected.clone())
        };
        self.launch_job(session, JobKind::Regenerate, request, handle, move |s, outcome| {
            s.finish_regeneration(&selected, outcome)
        })
        .await
    }

    pub async fn abandon_job(&self, id: Uuid) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let s = session.lock().await;
        if s.cancel_job() {
            info!(target = "studio.session", session = %id, "abandoning job");
        }
        Ok(s.snapshot(id))
    }

    pub async fn toggle_index(&self, id: Uuid, index: usize) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let mut s = session.lock().await;
        s.ensure_idle()?;
        let len = s.output.len();
        s.selected.toggle(index, len)?;
        Ok(s.snapshot(id))
    }

    pub async fn move_output(
        &self,
        id: Uuid,
        from: usize,
        to: usize,
        policy: MovePolicy,
    ) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let mut guard = session.lock().await;
        guard.ensure_idle()?;
        let s = &mut *guard;
        move_item(&mut s.output, &mut s.selected, from, to, policy)?;
        s.unfilled.clear();
        Ok(s.snapshot(id))
    }

    pub async fn remove_output(&self, id: Uuid, index: usize) -> Result<SessionSnapshot, StudioError> {
        let session = self.session(id).await?;
        let mut guard = session.lock().await;
        guard.ensure_idle()?;
        let s = &mut *guard;
        remove_item(&mut s.output, &mut s.selected, index)?;
        s.unfilled.clear();
        Ok(s.snapshot(id))
    }

    /// Assembles a listing from the current output list.
    pub async fn create_listing(
        &self,
        id: Uuid,
        listing: Option<Value>,
    ) -> Result<Option<Value>, StudioError> {
        let session = self.session(id).await?;
        let request = {
            let s = session.lock().await;
            let sku = s.sku.clone().ok_or_else(|| {
                StudioError::InvalidInput("no sku; fetch a listing first".into())
            })?;
            if s.output.is_empty() {
                return Err(StudioError::InvalidInput("output list is empty".into()));
            }
            let listing = listing.or_else(|| {
                s.listing
                    .as_ref()
                    .and_then(|summary| serde_json::to_value(summary).ok())
            });
            CreateListingRequest {
                sku,
                images: s.output.as_slice().to_vec(),
                listing,
            }
        };
        let backend = self.backend.clone();
        let open = async move { backend.create_listing(&request).await };
        self.run_streamed(session, Workflow::CreateListing, open, |s, data| {
            s.created_listing = data.clone();
            Ok(data)
        })
        .await
    }

    pub async fn upload_listing(
        &self,
        id: Uuid,
        filename: Option<String>,
    ) -> Result<UploadResult, StudioError> {
        let session = self.session(id).await?;
        let (sku, filename) = {
            let s = session.lock().await;
            let sku = s.sku.clone().ok_or_else(|| {
                StudioError::InvalidInput("no sku; fetch a listing first".into())
            })?;
            let filename = filename.or_else(|| {
                s.created_listing
                    .as_ref()
                    .and_then(|listing| listing.get("filename"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            (sku, filename)
        };
        let backend = self.backend.clone();
        let open = async move { backend.upload_listing(&sku, filename.as_deref()).await };
        self.run_streamed(session, Workflow::UploadListing, open, |s, data| {
            let raw = data
                .as_ref()
                .and_then(|d| d.get("upload_result"))
                .cloned()
                .ok_or_else(|| {
                    StudioError::InvalidResponse("upload finished without upload_result".into())
                })?;
            let result: UploadResult = serde_json::from_value(raw)
                .map_err(|err| StudioError::InvalidResponse(err.to_string()))?;
            s.upload_result = Some(result.clone());
            Ok(result)
        })
        .await
    }

    async fn run_streamed<T, O, A>(
        &self,
        session: Arc<Mutex<Session>>,
        workflow: Workflow,
        open: O,
        apply: A,
    ) -> Result<T, StudioError>
    where
        T: Send + 'static,
        O: Future<Output = Result<EventStream, StudioError>> + Send + 'static,
        A: FnOnce(&mut Session, Option<Value>) -> Result<T, StudioError> + Send + 'static,
    {
        {
            let mut s = session.lock().await;
            s.ensure_idle()?;
            s.busy = Some(workflow.name());
            s.workflow = Some(workflow);
            s.tracker = StepTracker::for_workflow(workflow);
        }
        info!(target = "studio.session", workflow = workflow.name(), "streamed flow started");

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let streamed = drain(&session, open).await;
            let mut s = session.lock().await;
            s.busy = None;
            let outcome = match streamed {
                Ok(data) => apply(&mut s, data),
                Err(err) => Err(err),
            };
            match &outcome {
                Ok(_) => s.tracker.finish(),
                Err(err) => {
                    warn!(target = "studio.session", workflow = workflow.name(), error = %err, "streamed flow failed");
                    s.tracker.fail();
                }
            }
            crate::metrics::step_elapsed(workflow.name(), started.elapsed().as_millis());
            outcome
        });
        task.await
            .map_err(|err| StudioError::Internal(err.to_string()))?
    }

    async fn launch_job<F>(
        &self,
        session: Arc<Mutex<Session>>,
        kind: JobKind,
        request: GenerationRequest,
        handle: PollHandle,
        finish: F,
    ) -> Result<Job, StudioError>
    where
        F: FnOnce(&mut Session, Result<Vec<Artifact>, StudioError>) + Send + 'static,
    {
        let backend = self.backend.clone();
        let poller = self.poller;
        let task = tokio::spawn(async move {
            let job = match poller.start(&*backend, &request).await {
                Ok(job) => job,
                Err(err) => {
                    let mut s = session.lock().await;
                    s.busy = None;
                    s.submitting = None;
                    return Err(err);
                }
            };
            let (tx, rx) = watch::channel(job.clone());
            {
                let mut s = session.lock().await;
                s.busy = None;
                s.submitting = None;
                s.job_error = None;
                s.job = Some(ActiveJob {
                    kind,
                    handle: handle.clone(),
                    updates: rx,
                    running: true,
                });
            }
            let submitted = job.clone();
            tokio::spawn(async move {
                let outcome = poller.run(&*backend, job, &handle, &tx).await;
                let mut s = session.lock().await;
                finish(&mut s, outcome);
                if let Some(active) = s.job.as_mut() {
                    active.running = false;
                }
            });
            Ok(submitted)
        });
        task.await
            .map_err(|err| StudioError::Internal(err.to_string()))?
    }
}

async fn drain<O>(session: &Mutex<Session>, open: O) -> Result<Option<Value>, StudioError>
where
    O: Future<Output = Result<EventStream, StudioError>>,
{
    let mut stream = open.await?;
    let mut outcome = StreamOutcome::default();
    while let Some(event) = stream.next_event().await? {
        session.lock().await.tracker.observe(&event);
        outcome.record(event);
    }
    outcome.finish()
}
