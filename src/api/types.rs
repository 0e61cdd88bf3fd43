use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::process::ProcessView;

/// Plain acknowledgement body: `{"message": "ok"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn ok() -> Self {
        Self {
            message: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponse {
    pub message: String,
    pub pid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowResponse {
    pub message: String,
    #[serde(rename = "proc")]
    pub process: ProcessView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub message: String,
    #[serde(rename = "procs")]
    pub processes: BTreeMap<String, ProcessView>,
}

/// Query of the live log route: which stream to follow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub stream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}
