//! Remote job service boundary: submit, poll, fetch result.

pub mod http;
pub mod types;

use async_trait::async_trait;

use crate::error::ServiceError;

pub use http::HttpJobService;
pub use types::*;

/// The remote service that runs cloaking jobs.
///
/// Implementations must not retry; the controller decides what a failure means.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload all files with the chosen parameters. Returns the job id.
    async fn submit(
        &self,
        files: &[InputFile],
        level: SecurityLevel,
        format: OutputFormat,
    ) -> Result<String, ServiceError>;

    /// Query the current status of a job.
    async fn status(&self, job_id: &str) -> Result<StatusResponse, ServiceError>;

    /// Fetch the finished artifact.
    async fn download(&self, job_id: &str) -> Result<Vec<u8>, ServiceError>;

    /// URL a browser would open to download the artifact.
    fn download_url(&self, job_id: &str) -> String;
}
