use crate::events::{ProgressStatus, WorkflowEvent};
use serde::Serialize;
use tracing::debug;

/// Streamed flows and the steps each one reports, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    FetchPhotos,
    CreateListing,
    UploadListing,
}

impl Workflow {
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            Workflow::FetchPhotos => &["fetch_listing", "extract_photos", "categorize_images"],
            Workflow::CreateListing => &[
                "prepare_images",
                "generate_text",
                "apply_aspects",
                "save_listing",
            ],
            Workflow::UploadListing => &[
                "refresh_token",
                "create_inventory",
                "create_offer",
                "publish_offer",
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Workflow::FetchPhotos => "fetch_photos",
            Workflow::CreateListing => "create_listing",
            Workflow::UploadListing => "upload_listing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepState {
    pub name: String,
    pub status: StepStatus,
}

/// Caller-facing progress of one streamed invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    pub is_active: bool,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub total_steps: Vec<String>,
    pub steps: Vec<StepState>,
}

#[derive(Debug, Clone, Default)]
pub struct StepTracker {
    progress: StepProgress,
}

impl StepTracker {
    pub fn start(steps: &[&str]) -> Self {
        let total_steps: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        let states = total_steps
            .iter()
            .map(|name| StepState {
                name: name.clone(),
                status: StepStatus::Pending,
            })
            .collect();
        Self {
            progress: StepProgress {
                is_active: true,
                current_step: None,
                completed_steps: Vec::new(),
                total_steps,
                steps: states,
            },
        }
    }

    pub fn for_workflow(workflow: Workflow) -> Self {
        Self::start(workflow.steps())
    }

    pub fn observe(&mut self, event: &WorkflowEvent) {
        let WorkflowEvent::Progress { step, status } = event else {
            return;
        };
        if !self.progress.is_active {
            return;
        }
        match status {
            ProgressStatus::InProgress => {
                self.progress.current_step = Some(step.clone());
                self.advance(step, StepStatus::InProgress);
            }
            ProgressStatus::Completed => {
                if !self.progress.completed_steps.contains(step) {
                    self.progress.completed_steps.push(step.clone());
                }
                self.advance(step, StepStatus::Completed);
            }
        }
    }

    // Status only moves forward; an undeclared step leaves the state list alone.
    fn advance(&mut self, step: &str, to: StepStatus) {
        match self.progress.steps.iter_mut().find(|s| s.name == step) {
            Some(state) if state.status < to => state.status = to,
            Some(_) => {}
            None => debug!(target = "studio.stream", step, "progress for undeclared step"),
        }
    }

    /// The stream ended normally: every declared step counts as done.
    pub fn finish(&mut self) {
        self.progress.completed_steps = self.progress.total_steps.clone();
        for state in &mut self.progress.steps {
            state.status = StepStatus::Completed;
        }
        self.progress.is_active = false;
    }

    /// The stream failed: progress is discarded.
    pub fn fail(&mut self) {
        self.progress = StepProgress::default();
    }

    pub fn progress(&self) -> &StepProgress {
        &self.progress
    }
}
