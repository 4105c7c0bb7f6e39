use crate::error::StudioError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DefaultOnNull, serde_as, skip_serializing_none};
use std::collections::BTreeMap;

/// Opaque reference to a produced image, usually a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact(pub String);

impl Artifact {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Artifact {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Artifact {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    #[default]
    Professional,
    RealWorld,
    Experimental,
}

/// Body of a submit-generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub photos: Vec<String>,
    pub categories: BTreeMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_modifier: Option<String>,
    pub image_type: ImageType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub total_images: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub completed: u32,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub generated_images: Vec<Artifact>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    #[serde(default)]
    pub errors: Vec<String>,
}

#[allow(non_snake_case)]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingSummary {
    pub itemId: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Value>,
    pub currency: Option<String>,
    pub itemCreationDate: Option<String>,
    pub categoryId: Option<String>,
    pub estimatedSoldQuantity: Option<u64>,
    #[serde(default)]
    pub localizedAspects: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateListingRequest {
    pub sku: String,
    pub images: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Final `data` payload of the fetch-photos stream.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotosPayload {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub listing: Option<ListingSummary>,
}

#[allow(non_snake_case)]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub listingId: Option<String>,
    pub href: Option<String>,
    pub ebayId: Option<String>,
}

/// Extracts the marketplace item id from either a bare id or an item URL.
pub fn listing_id_from_input(input: &str) -> Result<String, StudioError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(StudioError::InvalidInput("listing reference is empty".into()));
    }
    let Some((_, tail)) = trimmed.split_once("/itm/") else {
        return Ok(trimmed.to_string());
    };
    let path = tail.split(['?', '#']).next().unwrap_or_default();
    let id = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        return Err(StudioError::InvalidInput(format!(
            "no item id in `{trimmed}`"
        )));
    }
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_id_accepts_bare_ids_and_urls() {
        assert_eq!(listing_id_from_input(" 1234567 ").unwrap(), "1234567");
        assert_eq!(
            listing_id_from_input("https://www.ebay.com/itm/256789?hash=item3b").unwrap(),
            "256789"
        );
        assert_eq!(
            listing_id_from_input("ebay.com/itm/vintage-lamp/998877").unwrap(),
            "998877"
        );
    }

    #[test]
    fn listing_id_rejects_blank_and_missing_id() {
        assert!(matches!(
            listing_id_from_input("   "),
            Err(StudioError::InvalidInput(_))
        ));
        assert!(matches!(
            listing_id_from_input("https://www.ebay.com/itm/?x=1"),
            Err(StudioError::InvalidInput(_))
        ));
    }

    #[test]
    fn status_response_tolerates_null_lists() {
        let parsed: StatusResponse = serde_json::from_value(serde_json::json!({
            "status": "failed",
            "completed": 1,
            "generated_images": null,
            "errors": ["quota exceeded"],
        }))
        .unwrap();
        assert_eq!(parsed.status, JobStatus::Failed);
        assert!(parsed.generated_images.is_empty());
        assert_eq!(parsed.errors, vec!["quota exceeded".to_string()]);
    }

    #[test]
    fn submit_response_defaults_total() {
        let parsed: SubmitResponse =
            serde_json::from_value(serde_json::json!({"task_id": "t-1"})).unwrap();
        assert_eq!(parsed.task_id.as_deref(), Some("t-1"));
        assert_eq!(parsed.total_images, 0);
    }
}
