//! Canned processing API for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::ProcessActions;
use crate::error::{Error, Result};

/// Answers from an in-memory catalogue of processes and jobs, recording
/// every call. Unknown processes and jobs answer 404.
pub struct FakeProcessApi {
    calls: Mutex<Vec<String>>,
    jobs: BTreeMap<String, Vec<String>>,
    failing: HashSet<String>,
}

impl FakeProcessApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            jobs: BTreeMap::new(),
            failing: HashSet::new(),
        }
    }

    pub fn with_process(mut self, process_id: &str, jobs: &[&str]) -> Self {
        self.jobs.insert(
            process_id.to_string(),
            jobs.iter().map(|j| j.to_string()).collect(),
        );
        self
    }

    /// Make calls naming `id` (a process or a job) fail with 500.
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, ids: &[&str]) -> Result<()> {
        if let Some(id) = ids.iter().find(|id| self.failing.contains(**id)) {
            return Err(upstream(500, format!("{} is broken", id)));
        }
        Ok(())
    }

    fn jobs_of(&self, process_id: &str) -> Result<&Vec<String>> {
        self.jobs
            .get(process_id)
            .ok_or_else(|| upstream(404, format!("no such process {}", process_id)))
    }
}

fn upstream(actual: u16, body: String) -> Error {
    Error::UpstreamStatus {
        expected: 200,
        actual,
        body,
    }
}

#[async_trait]
impl ProcessActions for FakeProcessApi {
    async fn get_landing_page(&self) -> Result<Value> {
        self.record("landing".into());
        Ok(json!({"title": "ADES"}))
    }

    async fn get_processes(&self) -> Result<Value> {
        self.record("processes".into());
        self.check(&["processes"])?;
        let processes: Vec<Value> = self.jobs.keys().map(|id| json!({"id": id})).collect();
        Ok(json!({ "processes": processes }))
    }

    async fn deploy_process(&self, payload: &Value) -> Result<Value> {
        self.record(format!("deploy {}", payload));
        Ok(json!({"deployed": payload}))
    }

    async fn get_process_description(&self, process_id: &str) -> Result<Value> {
        self.record(format!("describe {}", process_id));
        self.jobs_of(process_id)?;
        Ok(json!({"id": process_id}))
    }

    async fn undeploy_process(&self, process_id: &str) -> Result<Value> {
        self.record(format!("undeploy {}", process_id));
        self.jobs_of(process_id)?;
        Ok(Value::Null)
    }

    async fn get_job_list(&self, process_id: &str) -> Result<Value> {
        self.record(format!("jobs {}", process_id));
        self.check(&[process_id])?;
        let jobs: Vec<Value> = self
            .jobs_of(process_id)?
            .iter()
            .map(|id| json!({"jobID": id}))
            .collect();
        Ok(json!({ "jobs": jobs }))
    }

    async fn execute(&self, process_id: &str, payload: &Value) -> Result<Value> {
        self.record(format!("execute {} {}", process_id, payload));
        self.jobs_of(process_id)?;
        Ok(json!({"jobID": "new-job", "status": "accepted", "inputs": payload}))
    }

    async fn get_status(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.record(format!("status {} {}", process_id, job_id));
        self.check(&[process_id, job_id])?;
        Ok(json!({"jobID": job_id, "status": "successful"}))
    }

    async fn dismiss_job(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.record(format!("dismiss {} {}", process_id, job_id));
        Ok(json!({"jobID": job_id, "status": "dismissed"}))
    }

    async fn get_result(&self, process_id: &str, job_id: &str) -> Result<Value> {
        self.record(format!("result {} {}", process_id, job_id));
        Ok(json!({"outputs": {}}))
    }
}
