//! Client-side operations over the correlated request/reply protocol.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::config::Timeouts;
use crate::error::Result;
use crate::protocol::{Correlator, JobReply, JobRequest, OperationTag, TimeoutClass};

/// Submits one request per operation and waits for its reply.
#[derive(Clone)]
pub struct ProcessClient {
    correlator: Correlator,
    timeouts: Timeouts,
}

impl ProcessClient {
    pub fn new(correlator: Correlator, timeouts: Timeouts) -> Self {
        Self {
            correlator,
            timeouts,
        }
    }

    pub fn timeout_for(&self, operation: OperationTag) -> Duration {
        let seconds = match operation.timeout_class() {
            TimeoutClass::Reply => self.timeouts.reply_seconds,
            TimeoutClass::Execute => self.timeouts.execute_seconds,
            TimeoutClass::Deploy => self.timeouts.deploy_seconds,
        };
        Duration::from_secs(seconds)
    }

    /// Submit `request` to `target` with the timeout of its operation.
    pub async fn call(&self, target: &str, request: JobRequest) -> JobReply {
        let timeout = self.timeout_for(request.operation);
        self.correlator.submit(target, request, timeout).await
    }

    pub async fn get_landing_page(&self, target: &str) -> JobReply {
        self.call(target, JobRequest::new(OperationTag::GetLandingPage))
            .await
    }

    pub async fn get_processes(&self, target: &str) -> JobReply {
        self.call(target, JobRequest::new(OperationTag::GetProcesses))
            .await
    }

    /// Deploy a process. The payload is sent verbatim as the `proc` form field.
    pub async fn deploy_process(&self, target: &str, payload: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::DeployProcess)
            .with_payload(Value::String(payload.to_string()));
        self.call(target, request).await
    }

    pub async fn get_process_description(&self, target: &str, process_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::GetProcessDescription).with_process(process_id);
        self.call(target, request).await
    }

    pub async fn undeploy_process(&self, target: &str, process_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::UndeployProcess).with_process(process_id);
        self.call(target, request).await
    }

    pub async fn get_job_list(&self, target: &str, process_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::GetJobList).with_process(process_id);
        self.call(target, request).await
    }

    pub async fn execute(&self, target: &str, process_id: &str, payload: Value) -> JobReply {
        let request = JobRequest::new(OperationTag::Execute)
            .with_process(process_id)
            .with_payload(payload);
        self.call(target, request).await
    }

    pub async fn get_status(&self, target: &str, process_id: &str, job_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::GetStatus)
            .with_process(process_id)
            .with_job(job_id);
        self.call(target, request).await
    }

    pub async fn dismiss(&self, target: &str, process_id: &str, job_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::DismissJob)
            .with_process(process_id)
            .with_job(job_id);
        self.call(target, request).await
    }

    pub async fn get_result(&self, target: &str, process_id: &str, job_id: &str) -> JobReply {
        let request = JobRequest::new(OperationTag::GetResult)
            .with_process(process_id)
            .with_job(job_id);
        self.call(target, request).await
    }

    /// Status of every job of every process, one call at a time.
    ///
    /// Fails only when the process listing fails. A failed job listing or
    /// status call is recorded in [`FullResult::skipped`] and the walk
    /// continues.
    pub async fn full_result(&self, target: &str) -> Result<FullResult> {
        let listing = self.get_processes(target).await.outcome.into_result()?;
        let mut result = FullResult::default();

        for process_id in process_ids(&listing) {
            let jobs = match self.get_job_list(target, &process_id).await.outcome.into_result() {
                Ok(body) => job_ids(&body),
                Err(e) => {
                    tracing::warn!("Skipping jobs of {}: {}", process_id, e);
                    result.skipped.push(SkippedCall {
                        operation: OperationTag::GetJobList,
                        process_id,
                        job_id: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            tracing::info!("Jobs for process {} : {:?}", process_id, jobs);

            let mut entry = ProcessJobs {
                process_id: process_id.clone(),
                jobs: Vec::with_capacity(jobs.len()),
            };
            for job_id in jobs {
                let reply = self.get_status(target, &process_id, &job_id).await;
                match reply.outcome.into_result() {
                    Ok(status) => entry.jobs.push(JobStatus { job_id, status }),
                    Err(e) => {
                        tracing::warn!("Skipping status of {}/{}: {}", process_id, job_id, e);
                        result.skipped.push(SkippedCall {
                            operation: OperationTag::GetStatus,
                            process_id: process_id.clone(),
                            job_id: Some(job_id),
                            error: e.to_string(),
                        });
                    }
                }
            }
            result.processes.push(entry);
        }

        Ok(result)
    }
}

/// Aggregate produced by [`ProcessClient::full_result`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FullResult {
    pub processes: Vec<ProcessJobs>,
    pub skipped: Vec<SkippedCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessJobs {
    pub process_id: String,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: Value,
}

/// A sub-call of the aggregate that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCall {
    pub operation: OperationTag,
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub error: String,
}

/// Turn a command-line Execute payload argument into request payload.
///
/// A path to an existing file is read and parsed as JSON; anything else is
/// sent as a literal string.
pub async fn resolve_payload(text: &str) -> Result<Value> {
    let path = Path::new(text);
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Ok(Value::String(text.to_string()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Process ids in a GetProcesses reply (`processes[].id`).
pub fn process_ids(body: &Value) -> Vec<String> {
    collect_ids(body, "processes", "id")
}

/// Job ids in a GetJobList reply (`jobs[].jobID`).
pub fn job_ids(body: &Value) -> Vec<String> {
    collect_ids(body, "jobs", "jobID")
}

fn collect_ids(body: &Value, list: &str, key: &str) -> Vec<String> {
    body.get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
