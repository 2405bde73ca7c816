//! Wire and parameter types shared by the job service and the controller.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Message used when the service reports a logical failure without detail.
pub const UNKNOWN_LOGIC_ERROR: &str = "Unknown logic error";

/// Cloaking intensity forwarded to the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Standard,
    Enhanced,
    Maximum,
}

impl SecurityLevel {
    /// Value sent as the `mode` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Enhanced => "enhanced",
            Self::Maximum => "maximum",
        }
    }

    /// Rough processing cost of a single image at this level.
    pub fn per_image_seconds(&self) -> u32 {
        match self {
            Self::Standard => 20,
            Self::Enhanced => 45,
            Self::Maximum => 90,
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Image format of the cloaked artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpg,
}

impl OutputFormat {
    /// Value sent as the `format` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A selected input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { name, bytes })
    }

    /// MIME type inferred from the file extension.
    pub fn content_type(&self) -> &'static str {
        let ext = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            _ => "application/octet-stream",
        }
    }
}

/// Response body of `POST /protect`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
}

/// Coarse job status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Pending,
    Started,
    Retry,
    Success,
    Failure,
    #[serde(other)]
    Other,
}

/// Response body of `GET /status/{task_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: RemoteStatus,
    /// Worker payload. Kept loose: a crashed worker may leave a bare string here.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Success marker inside a worker result. The service has been seen to send
/// both the integer `1` and the label `"SUCCESS"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResultMarker {
    Code(i64),
    Label(String),
    /// Any other JSON value. Never a success.
    Other(serde_json::Value),
}

impl ResultMarker {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Code(code) => *code == 1,
            Self::Label(label) => label == "SUCCESS",
            Self::Other(_) => false,
        }
    }

    /// Worker-defined reason for non-success codes.
    fn describe(&self) -> Option<&'static str> {
        match self {
            Self::Code(2) => Some("No face detected in input"),
            Self::Code(3) => Some("No images found in upload"),
            _ => None,
        }
    }
}

/// Structured worker result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub status: Option<ResultMarker>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
}

/// What a single status response means for the tracked task.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Not finished yet.
    Running,
    /// Finished and the worker reported success.
    Succeeded { elapsed_time: Option<f64> },
    /// Finished but the worker reported a logical failure.
    Failed {
        message: String,
        elapsed_time: Option<f64>,
    },
    /// The worker itself failed.
    Crashed,
}

impl StatusResponse {
    /// Parse the worker payload, if it is a structured result.
    ///
    /// Fields are read one by one so an odd value in one of them does not
    /// hide the others.
    pub fn job_result(&self) -> Option<JobResult> {
        let fields = self.result.as_ref()?.as_object()?;
        Some(JobResult {
            status: fields
                .get("status")
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            error: fields
                .get("error")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            elapsed_time: fields.get("elapsed_time").and_then(serde_json::Value::as_f64),
        })
    }

    pub fn outcome(&self) -> JobOutcome {
        match self.status {
            RemoteStatus::Success => {
                let result = self.job_result().unwrap_or_default();
                if result.status.as_ref().is_some_and(ResultMarker::is_success) {
                    return JobOutcome::Succeeded {
                        elapsed_time: result.elapsed_time,
                    };
                }
                let message = result
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .or_else(|| {
                        result
                            .status
                            .as_ref()
                            .and_then(ResultMarker::describe)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| UNKNOWN_LOGIC_ERROR.to_string());
                JobOutcome::Failed {
                    message,
                    elapsed_time: result.elapsed_time,
                }
            }
            RemoteStatus::Failure => JobOutcome::Crashed,
            RemoteStatus::Pending
            | RemoteStatus::Started
            | RemoteStatus::Retry
            | RemoteStatus::Other => JobOutcome::Running,
        }
    }
}
