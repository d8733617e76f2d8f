//! JSON bodies exchanged with the `/generate` and `/explore` endpoints.

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

pub const GENERATE_MISSING_FIELDS: &str = "Front image and background image are required";
pub const EXPLORE_MISSING_FIELDS: &str = "Image and prompt are required";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub front_image: Option<String>,
    #[serde(default)]
    pub background_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateInputs {
    pub front_image: String,
    pub background_image: String,
}

impl GenerateRequest {
    pub fn new(front_image: impl Into<String>, background_image: impl Into<String>) -> Self {
        Self {
            front_image: Some(front_image.into()),
            background_image: Some(background_image.into()),
        }
    }

    pub fn validate(&self) -> Result<GenerateInputs, FlowError> {
        let (Some(front_image), Some(background_image)) = (
            present(self.front_image.as_deref()),
            present(self.background_image.as_deref()),
        ) else {
            return Err(FlowError::invalid_input(GENERATE_MISSING_FIELDS));
        };
        Ok(GenerateInputs {
            front_image: front_image.to_string(),
            background_image: background_image.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub setting_video_url: Option<String>,
    pub person_video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExploreRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreInputs {
    pub image: String,
    pub prompt: String,
}

impl ExploreRequest {
    pub fn new(image: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            prompt: Some(prompt.into()),
        }
    }

    pub fn validate(&self) -> Result<ExploreInputs, FlowError> {
        let (Some(image), Some(prompt)) = (
            present(self.image.as_deref()),
            present(self.prompt.as_deref()),
        ) else {
            return Err(FlowError::invalid_input(EXPLORE_MISSING_FIELDS));
        };
        Ok(ExploreInputs {
            image: image.to_string(),
            prompt: prompt.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploreResponse {
    pub video_url: Option<String>,
}

// Empty strings are treated like absent fields.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|raw| !raw.trim().is_empty())
}
