use serde::{Deserialize, Serialize};

use crate::container_management::UpgradeStrategy;
use crate::error_handling::types::{ErrorKind, InstanceError, TemplateError};

/// API error payload
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub version: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRequest {
    /// Latest published version of the family when absent.
    #[serde(default)]
    pub target_template_id: Option<String>,
    #[serde(default = "default_strategy")]
    pub strategy: UpgradeStrategy,
}

fn default_strategy() -> UpgradeStrategy {
    UpgradeStrategy::Reset
}

/// Errors the HTTP layer knows how to turn into a status code.
pub trait ApiFailure: std::fmt::Display {
    fn kind(&self) -> ErrorKind;
}

impl ApiFailure for InstanceError {
    fn kind(&self) -> ErrorKind {
        InstanceError::kind(self)
    }
}

impl ApiFailure for TemplateError {
    fn kind(&self) -> ErrorKind {
        TemplateError::kind(self)
    }
}
