//! Request correlation.
//!
//! Each network request surfaces as three independently delivered events:
//! request started, response received, request finished. The correlator keys
//! in-progress requests by their protocol request id and folds the three
//! events into one finalized `NetworkEntry`. Delivery order is whatever the
//! channel gives us; events that cannot be matched are discarded, never
//! treated as errors.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;
use url::Url;

use tabscope_common::har::{
    HarCache, HarContent, HarPostData, HarRequest, HarResponse, HarTimings, NameValuePair,
    NetworkEntry,
};
use tabscope_common::protocol::{
    HeaderMap, RequestDescriptor, RequestWillBeSentParams, ResponseDescriptor,
};

/// A request whose lifecycle events are still being collected. Owned
/// exclusively by the correlator; mutated in place as the response arrives.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub request: RequestDescriptor,
    pub start_time: f64,
    pub wall_time: f64,
    pub initiator: Value,
    pub document_url: String,
    pub resource_type: Option<String>,
    pub redirect_response: Option<ResponseDescriptor>,
    pub response: Option<ResponseDescriptor>,
}

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: HashMap<String, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started request. A prior pending entry under the same id is
    /// overwritten; the protocol reuses ids across redirects.
    pub fn on_request_started(&mut self, params: RequestWillBeSentParams) {
        let RequestWillBeSentParams {
            request_id,
            document_url,
            request,
            timestamp,
            wall_time,
            initiator,
            redirect_response,
            resource_type,
        } = params;

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                request_id,
                request,
                start_time: timestamp,
                wall_time,
                initiator,
                document_url,
                resource_type,
                redirect_response,
                response: None,
            },
        );
    }

    /// Attach response metadata to the matching pending request. A response
    /// with no matching request is a correlation gap: its start event may not
    /// have been processed yet. Discarded, not an error.
    pub fn on_response_received(&mut self, request_id: &str, response: ResponseDescriptor) {
        match self.pending.get_mut(request_id) {
            Some(req) => req.response = Some(response),
            None => debug!("discarding response for unknown request {}", request_id),
        }
    }

    /// Finalize the request if its response metadata is already attached.
    /// Otherwise the request stays pending: a finish event alone never
    /// produces an entry, and a response arriving after the finish event does
    /// not retroactively finalize it.
    pub fn on_request_finished(
        &mut self,
        request_id: &str,
        finish_timestamp: f64,
    ) -> Option<NetworkEntry> {
        match self.pending.get(request_id) {
            None => {
                debug!("discarding finish for unknown request {}", request_id);
                return None;
            }
            Some(req) if req.response.is_none() => {
                debug!(
                    "request {} finished before its response; left pending",
                    request_id
                );
                return None;
            }
            Some(_) => {}
        }

        let mut req = self.pending.remove(request_id)?;
        let response = req.response.take()?;
        Some(build_entry(req, response, finish_timestamp))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop all pending requests. Called when a capture session ends.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            debug!("abandoning {} pending requests", self.pending.len());
        }
        self.pending.clear();
    }
}

fn build_entry(
    req: PendingRequest,
    response: ResponseDescriptor,
    finish_timestamp: f64,
) -> NetworkEntry {
    let PendingRequest {
        request_id,
        request,
        start_time,
        wall_time,
        initiator,
        document_url,
        resource_type: _,
        redirect_response: _,
        response: _,
    } = req;

    let elapsed_ms = (finish_timestamp - start_time) * 1000.0;
    let post_data = request.post_data.clone().unwrap_or_default();

    let request_block = HarRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        http_version: "HTTP/1.1".to_string(),
        headers: headers_to_pairs(&request.headers),
        query_string: parse_query_params(&request.url),
        headers_size: serde_json::to_string(&request.headers)
            .map(|s| s.len() as i64)
            .unwrap_or(-1),
        body_size: post_data.len() as i64,
        post_data: request.post_data.as_ref().map(|text| HarPostData {
            mime_type: header_value(&request.headers, "Content-Type"),
            text: text.clone(),
        }),
    };

    let response_block = HarResponse {
        status: response.status,
        status_text: response.status_text.clone(),
        http_version: "HTTP/1.1".to_string(),
        headers: headers_to_pairs(&response.headers),
        redirect_url: header_value(&response.headers, "location"),
        headers_size: response
            .headers_text
            .as_ref()
            .map(|t| t.len() as i64)
            .unwrap_or(-1),
        body_size: response.encoded_data_length,
        content: HarContent {
            size: response.encoded_data_length,
            mime_type: response.mime_type.clone(),
            // Filled in by `with_body` if the body fetch resolves.
            text: String::new(),
            encoding: None,
        },
    };

    let (send, wait) = match response.timing {
        Some(timing) => (
            mark_delta(timing.send_start, timing.send_end),
            mark_delta(timing.send_end, timing.receive_headers_end),
        ),
        None => (0.0, 0.0),
    };

    NetworkEntry {
        pageref: document_url,
        started_date_time: wall_time_to_iso(wall_time),
        time: elapsed_ms,
        request_id,
        initiator,
        priority: response.priority,
        fetched_via_service_worker: response.from_service_worker,
        transfer_size: response.encoded_data_length,
        error: response.error_text,
        request: request_block,
        response: response_block,
        cache: HarCache::default(),
        timings: HarTimings {
            send,
            wait,
            receive: elapsed_ms,
        },
    }
}

/// Difference between two timing marks, zero when either mark is absent (-1)
/// or the difference would be negative.
fn mark_delta(from: f64, to: f64) -> f64 {
    if from < 0.0 || to < 0.0 {
        return 0.0;
    }
    (to - from).max(0.0)
}

fn wall_time_to_iso(wall_time: f64) -> String {
    Utc.timestamp_millis_opt((wall_time * 1000.0).round() as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Flatten a header object into name/value pairs, preserving the source
/// insertion order. One pair per map entry; nothing is merged or re-sorted.
fn headers_to_pairs(headers: &HeaderMap) -> Vec<NameValuePair> {
    headers
        .iter()
        .map(|(name, value)| NameValuePair {
            name: name.clone(),
            value: match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            },
        })
        .collect()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Query pairs from the request URL. A URL the parser rejects yields an
/// empty list; the entry is still constructed.
fn parse_query_params(raw: &str) -> Vec<NameValuePair> {
    match Url::parse(raw) {
        Ok(url) => url
            .query_pairs()
            .map(|(name, value)| NameValuePair {
                name: name.into_owned(),
                value: value.into_owned(),
            })
            .collect(),
        Err(e) => {
            debug!("query parse skipped for malformed url {}: {}", raw, e);
            Vec::new()
        }
    }
}
