//! Processing API actions.

use async_trait::async_trait;
use serde_json::Value;

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpProcessApi;

use crate::error::Result;
use crate::protocol::{JobRequest, OperationTag};

/// One method per operation tag.
#[async_trait]
pub trait ProcessActions: Send + Sync {
    async fn get_landing_page(&self) -> Result<Value>;

    async fn get_processes(&self) -> Result<Value>;

    async fn deploy_process(&self, payload: &Value) -> Result<Value>;

    async fn get_process_description(&self, process_id: &str) -> Result<Value>;

    async fn undeploy_process(&self, process_id: &str) -> Result<Value>;

    async fn get_job_list(&self, process_id: &str) -> Result<Value>;

    async fn execute(&self, process_id: &str, payload: &Value) -> Result<Value>;

    async fn get_status(&self, process_id: &str, job_id: &str) -> Result<Value>;

    async fn dismiss_job(&self, process_id: &str, job_id: &str) -> Result<Value>;

    async fn get_result(&self, process_id: &str, job_id: &str) -> Result<Value>;
}

/// Route a request to the matching action.
pub async fn invoke(actions: &dyn ProcessActions, request: &JobRequest) -> Result<Value> {
    match request.operation {
        OperationTag::GetLandingPage => actions.get_landing_page().await,
        OperationTag::GetProcesses => actions.get_processes().await,
        OperationTag::DeployProcess => actions.deploy_process(request.require_payload()?).await,
        OperationTag::GetProcessDescription => {
            actions
                .get_process_description(request.require_process_id()?)
                .await
        }
        OperationTag::UndeployProcess => {
            actions.undeploy_process(request.require_process_id()?).await
        }
        OperationTag::GetJobList => actions.get_job_list(request.require_process_id()?).await,
        OperationTag::Execute => {
            actions
                .execute(request.require_process_id()?, request.require_payload()?)
                .await
        }
        OperationTag::GetStatus => {
            actions
                .get_status(request.require_process_id()?, request.require_job_id()?)
                .await
        }
        OperationTag::DismissJob => {
            actions
                .dismiss_job(request.require_process_id()?, request.require_job_id()?)
                .await
        }
        OperationTag::GetResult => {
            actions
                .get_result(request.require_process_id()?, request.require_job_id()?)
                .await
        }
    }
}
