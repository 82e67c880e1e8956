//! HTTP adapter for the processing API.

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::ProcessActions;
use crate::config::ProcessingApi;
use crate::error::{Error, Result};
use crate::protocol::types::{BodyKind, HttpMethod};
use crate::protocol::OperationTag;

/// Processing API reached over HTTP.
pub struct HttpProcessApi {
    client: Client,
    base_url: Url,
    timeout: Option<Duration>,
}

impl HttpProcessApi {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("{} cannot be a base URL", base_url)));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            timeout,
        })
    }

    pub fn from_settings(api: &ProcessingApi) -> Result<Self> {
        Self::new(
            &api.base_url,
            api.request_timeout_seconds.map(Duration::from_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of an operation, with path parameters escaped.
    pub fn url_for(
        &self,
        operation: OperationTag,
        process_id: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<Url> {
        let segments = operation.route().segments(process_id, job_id)?;
        let mut url = self.base_url.clone();
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| Error::Config(format!("{} cannot be a base URL", self.base_url)))?
                .pop_if_empty()
                .extend(&segments);
        }
        Ok(url)
    }

    /// Issue the call for `operation` and check the status code.
    async fn submit_request(
        &self,
        operation: OperationTag,
        process_id: Option<&str>,
        job_id: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Value> {
        let route = operation.route();
        let url = self.url_for(operation, process_id, job_id)?;
        let method = match route.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        };
        tracing::info!("{} {} ({})", method, url, operation);

        let mut request = self.client.request(method, url.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        request = match (route.body, payload) {
            (BodyKind::Form, Some(payload)) => {
                let proc_field = match payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request.form(&[("proc", proc_field)])
            }
            // Literal JSON text goes out as-is rather than as a JSON string
            (BodyKind::Json, Some(Value::String(text))) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(text.clone()),
            (BodyKind::Json, Some(payload)) => request.json(payload),
            _ => request.header(header::CONTENT_TYPE, "application/json"),
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        tracing::info!("status code: {}", status);

        if status != route.expected_status {
            return Err(Error::UpstreamStatus {
                expected: route.expected_status,
                actual: status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        let body: Value = serde_json::from_slice(&bytes)?;
        tracing::debug!("{} response: {}", operation, body);
        Ok(body)
    }
}

#[async_trait]
impl ProcessActions for HttpProcessApi {
    async fn get_landing_page(&self) -> Result<Value> {
        self.submit_request(OperationTag::GetLandingPage, None, None, None)
            .await
    }

    async fn get_processes(&self) -> Result<Value> {
        self.submit_request(OperationTag::GetProcesses, None, None, None)
            .await
    }

    async fn deploy_process(&self, payload: &Value) -> Result<Value> {
        self.submit_request(OperationTag::DeployProcess, None, None, Some(payload))
            .await
    }

    async fn get_process_description(&self, process_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::GetProcessDescription, Some(process_id), None, None)
            .await
    }

    async fn undeploy_process(&self, process_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::UndeployProcess, Some(process_id), None, None)
            .await
    }

    async fn get_job_list(&self, process_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::GetJobList, Some(process_id), None, None)
            .await
    }

    async fn execute(&self, process_id: &str, payload: &Value) -> Result<Value> {
        self.submit_request(OperationTag::Execute, Some(process_id), None, Some(payload))
            .await
    }

    async fn get_status(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::GetStatus, Some(process_id), Some(job_id), None)
            .await
    }

    async fn dismiss_job(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::DismissJob, Some(process_id), Some(job_id), None)
            .await
    }

    async fn get_result(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.submit_request(OperationTag::GetResult, Some(process_id), Some(job_id), None)
            .await
    }
}
