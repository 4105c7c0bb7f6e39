use crate::config::StudioConfig;
use crate::error::{StudioError, map_reqwest_error};
use crate::events::EventStream;
use crate::http::{build_client, build_streaming_client};
use crate::models::{
    CreateListingRequest, GenerationRequest, StatusResponse, SubmitResponse, UploadRequest,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use urlencoding::encode;

/// Batch image generation, driven through submit-then-poll.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn submit_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<SubmitResponse, StudioError>;

    async fn poll_generation_status(&self, task_id: &str) -> Result<StatusResponse, StudioError>;
}

/// Listing flows that report progress inline as an event stream.
#[async_trait]
pub trait ListingBackend: Send + Sync {
    async fn fetch_photos(&self, listing_id: &str) -> Result<EventStream, StudioError>;

    async fn create_listing(
        &self,
        request: &CreateListingRequest,
    ) -> Result<EventStream, StudioError>;

    /// Without a filename the backend uploads the latest saved listing for `sku`.
    async fn upload_listing(
        &self,
        sku: &str,
        filename: Option<&str>,
    ) -> Result<EventStream, StudioError>;
}

pub trait StudioBackend: GenerationBackend + ListingBackend {}

impl<T: GenerationBackend + ListingBackend> StudioBackend for T {}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    http: Client,
    streaming: Client,
}

impl HttpBackend {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            http: build_client(config),
            streaming: build_streaming_client(config),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn open_stream(&self, request: RequestBuilder) -> Result<EventStream, StudioError> {
        let response = checked(request.send().await.map_err(map_reqwest_error)?).await?;
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error));
        Ok(EventStream::new(chunks))
    }
}

async fn checked(response: Response) -> Result<Response, StudioError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StudioError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, StudioError> {
    let response = checked(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| StudioError::InvalidResponse(err.to_string()))
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn submit_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<SubmitResponse, StudioError> {
        debug!(target = "studio.backend", photos = request.photos.len(), "submit_generation");
        let response = self
            .http
            .post(self.url("/api/generate-images"))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn poll_generation_status(&self, task_id: &str) -> Result<StatusResponse, StudioError> {
        let url = self.url(&format!("/api/generate-images/{}", encode(task_id)));
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }
}

#[async_trait]
impl ListingBackend for HttpBackend {
    async fn fetch_photos(&self, listing_id: &str) -> Result<EventStream, StudioError> {
        debug!(target = "studio.backend", listing_id, "fetch_photos");
        let url = self.url(&format!("/api/photos/{}/stream", encode(listing_id)));
        self.open_stream(self.streaming.get(url)).await
    }

    async fn create_listing(
        &self,
        request: &CreateListingRequest,
    ) -> Result<EventStream, StudioError> {
        debug!(target = "studio.backend", sku = %request.sku, images = request.images.len(), "create_listing");
        self.open_stream(self.streaming.post(self.url("/api/listings")).json(request))
            .await
    }

    async fn upload_listing(
        &self,
        sku: &str,
        filename: Option<&str>,
    ) -> Result<EventStream, StudioError> {
        debug!(target = "studio.backend", sku, filename = ?filename, "upload_listing");
        let url = self.url(&format!("/api/listings/{}/upload", encode(sku)));
        let body = UploadRequest {
            filename: filename.map(str::to_string),
        };
        self.open_stream(self.streaming.post(url).json(&body)).await
    }
}
