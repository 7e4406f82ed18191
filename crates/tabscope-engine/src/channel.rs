//! The instrumentation channel abstraction.
//!
//! A `Channel` is the tab-side collaborator: it attaches to a target,
//! enables event streams, delivers raw `(method, params)` pairs through the
//! `EventSink` it was given at attach time, and serves asynchronous body
//! fetches. The CDP implementation lives in the headless crate; tests use an
//! in-process fake.

use async_trait::async_trait;
use serde_json::Value;

use crate::service::EventSink;
use tabscope_common::protocol::ResponseBody;

/// A raw instrumentation event, exactly as the channel delivered it.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to attach instrumentation channel: {0}")]
    Attach(String),

    #[error("Failed to detach instrumentation channel: {0}")]
    Detach(String),

    #[error("Failed to enable {stream} events: {reason}")]
    Enable { stream: String, reason: String },

    #[error("Body fetch failed for request {request_id}: {reason}")]
    BodyFetch { request_id: String, reason: String },

    #[error("Channel is not attached")]
    NotAttached,
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Attach to the target and start delivering events into `events`.
    /// Failure leaves the controller idle and is surfaced to the caller.
    async fn attach(&self, events: EventSink) -> Result<(), ChannelError>;

    /// Stop event delivery. Events already in flight may still arrive; the
    /// controller discards them.
    async fn detach(&self) -> Result<(), ChannelError>;

    /// Enable one event stream (e.g. "Network", "Console").
    async fn enable(&self, stream: &str) -> Result<(), ChannelError>;

    /// Fetch a response body. May resolve long after the request finished,
    /// or after the session stopped; the caller owns staleness handling.
    async fn fetch_body(&self, request_id: &str) -> Result<ResponseBody, ChannelError>;
}
