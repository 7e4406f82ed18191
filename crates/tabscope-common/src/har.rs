//! HAR 1.2 document model.
//!
//! The shape mirrors what DevTools-based capture tooling emits: standard HAR
//! fields plus the underscore-prefixed custom fields (`_requestId`,
//! `_initiator`, ...) carried per entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ResponseBody;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarDocument {
    pub log: HarLog,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<NetworkEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

/// A finalized network record. Immutable once appended to the accumulator;
/// `with_body` is the one transformation applied between correlation and
/// append, when the asynchronous body fetch resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub pageref: String,
    pub started_date_time: String,
    /// Total elapsed time in milliseconds.
    pub time: f64,
    #[serde(rename = "_requestId")]
    pub request_id: String,
    #[serde(rename = "_initiator", default)]
    pub initiator: Value,
    #[serde(rename = "_priority", default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(rename = "_fetchedViaServiceWorker")]
    pub fetched_via_service_worker: bool,
    #[serde(rename = "_transferSize")]
    pub transfer_size: f64,
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request: HarRequest,
    pub response: HarResponse,
    pub cache: HarCache,
    pub timings: HarTimings,
}

impl NetworkEntry {
    /// Attach a fetched response body. Absent or failed fetches leave the
    /// content text empty and the encoding unset.
    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.response.content.text = body.body;
        self.response.content.encoding = if body.base64_encoded {
            Some("base64".to_string())
        } else {
            None
        };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameValuePair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<NameValuePair>,
    pub query_string: Vec<NameValuePair>,
    pub headers_size: i64,
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    pub mime_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<NameValuePair>,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers_size: i64,
    pub body_size: f64,
    pub content: HarContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: f64,
    pub mime_type: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// Placeholder; cache inspection is not captured, but the HAR shape requires
/// the field. Serializes to `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarCache {}

/// Send/wait/receive in milliseconds, each zero when the underlying timing
/// marks are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}
