//! Operation tags and their processing API routes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Remote operation a request asks the worker to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationTag {
    GetLandingPage,
    GetProcesses,
    DeployProcess,
    GetProcessDescription,
    UndeployProcess,
    GetJobList,
    Execute,
    GetStatus,
    DismissJob,
    GetResult,
}

/// HTTP method of a processing API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

/// How the request body of a call is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    None,
    /// `application/x-www-form-urlencoded` with the payload in `proc`
    Form,
    Json,
}

/// Reply timeout class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Reply,
    Execute,
    Deploy,
}

/// One processing API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub method: HttpMethod,
    /// Path relative to the API root, with `{processId}` and `{jobId}` placeholders.
    pub template: &'static str,
    pub expected_status: u16,
    pub body: BodyKind,
}

impl Route {
    /// Path segments with placeholders filled in. Empty for the API root.
    pub fn segments(
        &self,
        process_id: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        self.template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| match segment {
                "{processId}" => process_id
                    .map(str::to_string)
                    .ok_or_else(|| Error::handler("Missing required parameter: process_id")),
                "{jobId}" => job_id
                    .map(str::to_string)
                    .ok_or_else(|| Error::handler("Missing required parameter: job_id")),
                literal => Ok(literal.to_string()),
            })
            .collect()
    }
}

impl OperationTag {
    pub const ALL: [OperationTag; 10] = [
        OperationTag::GetLandingPage,
        OperationTag::GetProcesses,
        OperationTag::DeployProcess,
        OperationTag::GetProcessDescription,
        OperationTag::UndeployProcess,
        OperationTag::GetJobList,
        OperationTag::Execute,
        OperationTag::GetStatus,
        OperationTag::DismissJob,
        OperationTag::GetResult,
    ];

    /// Wire spelling used in `job_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationTag::GetLandingPage => "GetLandingPage",
            OperationTag::GetProcesses => "GetProcesses",
            OperationTag::DeployProcess => "DeployProcess",
            OperationTag::GetProcessDescription => "GetProcessDescription",
            OperationTag::UndeployProcess => "UndeployProcess",
            OperationTag::GetJobList => "GetJobList",
            OperationTag::Execute => "Execute",
            OperationTag::GetStatus => "GetStatus",
            OperationTag::DismissJob => "DismissJob",
            OperationTag::GetResult => "GetResult",
        }
    }

    pub fn route(&self) -> Route {
        use BodyKind as B;
        use HttpMethod::*;

        let (method, template, expected_status, body) = match self {
            OperationTag::GetLandingPage => (Get, "/", 200, B::None),
            OperationTag::GetProcesses => (Get, "/processes", 200, B::None),
            OperationTag::DeployProcess => (Post, "/processes", 201, B::Form),
            OperationTag::GetProcessDescription => (Get, "/processes/{processId}", 200, B::None),
            OperationTag::UndeployProcess => (Delete, "/processes/{processId}", 200, B::None),
            OperationTag::GetJobList => (Get, "/processes/{processId}/jobs", 200, B::None),
            OperationTag::Execute => (Post, "/processes/{processId}/jobs", 201, B::Json),
            OperationTag::GetStatus => (Get, "/processes/{processId}/jobs/{jobId}", 200, B::None),
            OperationTag::DismissJob => {
                (Delete, "/processes/{processId}/jobs/{jobId}", 200, B::None)
            }
            OperationTag::GetResult => {
                (Get, "/processes/{processId}/jobs/{jobId}/result", 200, B::None)
            }
        };

        Route {
            method,
            template,
            expected_status,
            body,
        }
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            OperationTag::DeployProcess => TimeoutClass::Deploy,
            OperationTag::Execute => TimeoutClass::Execute,
            _ => TimeoutClass::Reply,
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        OperationTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| Error::UnsupportedOperation(s.to_string()))
    }
}
