//! HTTP client for the cloaking service.

use async_trait::async_trait;
use reqwest::Url;
use reqwest::multipart::{Form, Part};

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::service::JobService;
use crate::service::types::{InputFile, OutputFormat, SecurityLevel, StatusResponse, SubmitResponse};

/// Multipart field name the service reads uploads from.
const FILES_FIELD: &str = "files";

/// `JobService` over HTTP (reqwest).
pub struct HttpJobService {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpJobService {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: &ClientConfig, client: reqwest::Client) -> Self {
        Self {
            base_url: config.base_url.clone(),
            client,
        }
    }

    /// Append path segments to the base URL, keeping any base path prefix.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn build_form(files: &[InputFile]) -> Result<Form, ServiceError> {
        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(file.content_type())
                .map_err(|e| ServiceError::InvalidPart {
                    file_name: file.name.clone(),
                    reason: e.to_string(),
                })?;
            form = form.part(FILES_FIELD, part);
        }
        Ok(form)
    }

    async fn get(&self, endpoint: &str, url: Url) -> Result<reqwest::Response, ServiceError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::RequestFailed {
                endpoint: endpoint.into(),
                reason: e.to_string(),
            })?;
        check_status(endpoint, resp)
    }
}

fn check_status(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ServiceError::Http {
            endpoint: endpoint.into(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit(
        &self,
        files: &[InputFile],
        level: SecurityLevel,
        format: OutputFormat,
    ) -> Result<String, ServiceError> {
        let form = Self::build_form(files)?;

        let resp = self
            .client
            .post(self.endpoint(&["protect"]))
            .query(&[("mode", level.as_str()), ("format", format.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::RequestFailed {
                endpoint: "protect".into(),
                reason: e.to_string(),
            })?;

        let body: SubmitResponse = check_status("protect", resp)?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse {
                endpoint: "protect".into(),
                reason: e.to_string(),
            })?;

        if body.task_id.is_empty() {
            return Err(ServiceError::InvalidResponse {
                endpoint: "protect".into(),
                reason: "empty task_id".into(),
            });
        }

        tracing::debug!(job_id = %body.task_id, files = files.len(), "Submission accepted");
        Ok(body.task_id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, ServiceError> {
        self.get("status", self.endpoint(&["status", job_id]))
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse {
                endpoint: "status".into(),
                reason: e.to_string(),
            })
    }

    async fn download(&self, job_id: &str) -> Result<Vec<u8>, ServiceError> {
        let bytes = self
            .get("download", self.endpoint(&["download", job_id]))
            .await?
            .bytes()
            .await
            .map_err(|e| ServiceError::RequestFailed {
                endpoint: "download".into(),
                reason: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    fn download_url(&self, job_id: &str) -> String {
        self.endpoint(&["download", job_id]).to_string()
    }
}
