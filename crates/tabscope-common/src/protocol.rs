//! Typed model of the instrumentation channel's event surface.
//!
//! The channel delivers raw `(method, params)` pairs. `DebuggerEvent::decode`
//! maps them into a closed set of variants at the boundary, so downstream
//! components match exhaustively instead of digging through parameter bags.
//! Methods this crate does not model decode to `Unrecognized` and are dropped
//! by the dispatch path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header object as delivered by the protocol. `serde_json`'s `preserve_order`
/// feature keeps the source insertion order, which the HAR conversion relies
/// on when flattening to name/value pairs.
pub type HeaderMap = serde_json::Map<String, Value>;

/// A decoded instrumentation event.
#[derive(Debug, Clone)]
pub enum DebuggerEvent {
    ConsoleMessage(ConsoleMessage),
    RequestStarted(RequestWillBeSentParams),
    ResponseReceived(ResponseReceivedParams),
    RequestFinished(LoadingFinishedParams),
    /// Unknown method, or a known method whose params did not parse.
    Unrecognized,
}

impl DebuggerEvent {
    /// Decode a raw `(method, params)` pair. Pure; never fails — anything the
    /// model does not cover becomes `Unrecognized`.
    pub fn decode(method: &str, params: Value) -> Self {
        match method {
            "Console.messageAdded" => serde_json::from_value::<ConsoleMessageParams>(params)
                .map(|p| DebuggerEvent::ConsoleMessage(p.message))
                .unwrap_or(DebuggerEvent::Unrecognized),
            "Network.requestWillBeSent" => serde_json::from_value(params)
                .map(DebuggerEvent::RequestStarted)
                .unwrap_or(DebuggerEvent::Unrecognized),
            "Network.responseReceived" => serde_json::from_value(params)
                .map(DebuggerEvent::ResponseReceived)
                .unwrap_or(DebuggerEvent::Unrecognized),
            "Network.loadingFinished" => serde_json::from_value(params)
                .map(DebuggerEvent::RequestFinished)
                .unwrap_or(DebuggerEvent::Unrecognized),
            _ => DebuggerEvent::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessageParams {
    pub message: ConsoleMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    pub request_id: String,
    #[serde(rename = "documentURL", default)]
    pub document_url: String,
    pub request: RequestDescriptor,
    /// Monotonic seconds; elapsed time is measured against this.
    pub timestamp: f64,
    /// Seconds since epoch; becomes the entry's startedDateTime.
    #[serde(default)]
    pub wall_time: f64,
    /// Carried verbatim into the entry's `_initiator` field.
    #[serde(default)]
    pub initiator: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_response: Option<ResponseDescriptor>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    pub request_id: String,
    #[serde(default)]
    pub timestamp: f64,
    pub response: ResponseDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDescriptor {
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HeaderMap,
    /// Raw header text when the protocol supplies it; its length is the
    /// response headersSize, -1 otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_text: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub from_service_worker: bool,
    #[serde(default)]
    pub encoded_data_length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<ResourceTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

/// Timing marks in milliseconds relative to the request start. The protocol
/// reports -1 for marks that never happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    #[serde(default = "absent_mark")]
    pub send_start: f64,
    #[serde(default = "absent_mark")]
    pub send_end: f64,
    #[serde(default = "absent_mark")]
    pub receive_headers_end: f64,
}

fn absent_mark() -> f64 {
    -1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedParams {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub encoded_data_length: f64,
}

/// Result of the asynchronous body fetch (`Network.getResponseBody`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_console_message() {
        let params = json!({
            "message": {
                "source": "console-api",
                "level": "warning",
                "text": "boom",
                "url": "https://x",
                "line": 3,
                "column": 7
            }
        });
        match DebuggerEvent::decode("Console.messageAdded", params) {
            DebuggerEvent::ConsoleMessage(msg) => {
                assert_eq!(msg.level, "warning");
                assert_eq!(msg.text, "boom");
                assert_eq!(msg.url.as_deref(), Some("https://x"));
                assert_eq!(msg.line, Some(3));
                assert_eq!(msg.column, Some(7));
            }
            other => panic!("expected ConsoleMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_request_started() {
        let params = json!({
            "requestId": "42.1",
            "documentURL": "https://example.com/",
            "request": {
                "method": "GET",
                "url": "https://example.com/api?q=1",
                "headers": {"Accept": "*/*"}
            },
            "timestamp": 1000.5,
            "wallTime": 1700000000.25,
            "initiator": {"type": "script"},
            "type": "XHR"
        });
        match DebuggerEvent::decode("Network.requestWillBeSent", params) {
            DebuggerEvent::RequestStarted(p) => {
                assert_eq!(p.request_id, "42.1");
                assert_eq!(p.request.method, "GET");
                assert_eq!(p.document_url, "https://example.com/");
                assert_eq!(p.resource_type.as_deref(), Some("XHR"));
            }
            other => panic!("expected RequestStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_unrecognized() {
        let event = DebuggerEvent::decode("Network.webSocketCreated", json!({"requestId": "1"}));
        assert!(matches!(event, DebuggerEvent::Unrecognized));
    }

    #[test]
    fn test_malformed_params_are_unrecognized() {
        // Known method, but the params bag is missing required fields.
        let event = DebuggerEvent::decode("Network.requestWillBeSent", json!({"bogus": true}));
        assert!(matches!(event, DebuggerEvent::Unrecognized));
    }

    #[test]
    fn test_timing_marks_default_to_absent() {
        let timing: ResourceTiming = serde_json::from_value(json!({"sendStart": 2.0})).unwrap();
        assert_eq!(timing.send_start, 2.0);
        assert_eq!(timing.send_end, -1.0);
        assert_eq!(timing.receive_headers_end, -1.0);
    }
}
