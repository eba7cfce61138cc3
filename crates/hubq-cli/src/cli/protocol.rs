//! Control socket wire format: one JSON object per line in each direction.
//!
//! A client sends one [`Envelope`]; the daemon answers with one [`Reply`], or
//! with a stream of replies (one per event) for `watch` until either side hangs up.

use hubq_core::gateway::SubmitRequest;
use hubq_core::store::JobQuery;
use hubq_core::{HubqError, JobId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Submit { request: SubmitRequest },
    Get { id: JobId },
    List {
        #[serde(default)]
        query: JobQuery,
    },
    Pause { id: JobId },
    Resume { id: JobId },
    Cancel { id: JobId },
    Retry {
        id: JobId,
        #[serde(default)]
        resume: bool,
    },
    Remove { id: JobId },
    /// All jobs when `id` is absent.
    Watch {
        #[serde(default)]
        id: Option<JobId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&HubqError> for ErrorBody {
    fn from(e: &HubqError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(serde_json::Value),
    Error(ErrorBody),
}

impl Reply {
    pub fn from_result<T: Serialize>(result: Result<T, HubqError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(v) => Reply::Ok(v),
                Err(e) => Reply::Error(ErrorBody {
                    kind: "InternalError".to_string(),
                    message: format!("encoding reply: {e}"),
                }),
            },
            Err(e) => Reply::Error(ErrorBody::from(&e)),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Reply::Error(ErrorBody {
            kind: "ValidationError".to_string(),
            message: message.into(),
        })
    }
}
