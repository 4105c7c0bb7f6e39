pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod poller;
pub mod reorder;
pub mod selection;
pub mod steps;
pub mod studio;

pub use backend::{GenerationBackend, HttpBackend, ListingBackend, StudioBackend};
pub use config::StudioConfig;
pub use error::{JobError, JobErrorKind, StudioError};
pub use studio::Studio;
