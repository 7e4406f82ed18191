//! CDP-backed instrumentation channel.
//!
//! Subscribes to the console and network event streams on a chromiumoxide
//! `Page` and forwards each event as the raw `(method, params)` pair the
//! engine's decoder expects. Body fetches go through
//! `Network.getResponseBody`.

use std::sync::Mutex;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::console::{
    self, EventMessageAdded,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use tabscope_engine::channel::{Channel, ChannelError};
use tabscope_engine::protocol::ResponseBody;
use tabscope_engine::service::EventSink;

pub struct CdpChannel {
    page: Page,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpChannel {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn stop_listeners(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            for handle in listeners.drain(..) {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Channel for CdpChannel {
    async fn attach(&self, events: EventSink) -> Result<(), ChannelError> {
        // Replace any listeners left over from a previous session.
        self.stop_listeners();
        let mut handles = Vec::new();

        let mut console_events = self
            .page
            .event_listener::<EventMessageAdded>()
            .await
            .map_err(|e| ChannelError::Attach(format!("console events: {}", e)))?;
        let sink = events.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                match serde_json::to_value(&*event) {
                    Ok(params) => {
                        if !sink.deliver("Console.messageAdded", params) {
                            break;
                        }
                    }
                    Err(e) => debug!("skipping unserializable console event: {}", e),
                }
            }
        }));

        let mut request_events = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| ChannelError::Attach(format!("request events: {}", e)))?;
        let sink = events.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                match serde_json::to_value(&*event) {
                    Ok(params) => {
                        if !sink.deliver("Network.requestWillBeSent", params) {
                            break;
                        }
                    }
                    Err(e) => debug!("skipping unserializable request event: {}", e),
                }
            }
        }));

        let mut response_events = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ChannelError::Attach(format!("response events: {}", e)))?;
        let sink = events.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = response_events.next().await {
                match serde_json::to_value(&*event) {
                    Ok(params) => {
                        if !sink.deliver("Network.responseReceived", params) {
                            break;
                        }
                    }
                    Err(e) => debug!("skipping unserializable response event: {}", e),
                }
            }
        }));

        let mut finished_events = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| ChannelError::Attach(format!("loading-finished events: {}", e)))?;
        let sink = events;
        handles.push(tokio::spawn(async move {
            while let Some(event) = finished_events.next().await {
                match serde_json::to_value(&*event) {
                    Ok(params) => {
                        if !sink.deliver("Network.loadingFinished", params) {
                            break;
                        }
                    }
                    Err(e) => debug!("skipping unserializable loading-finished event: {}", e),
                }
            }
        }));

        if let Ok(mut listeners) = self.listeners.lock() {
            *listeners = handles;
        }
        Ok(())
    }

    async fn detach(&self) -> Result<(), ChannelError> {
        self.stop_listeners();

        if let Err(e) = self.page.execute(network::DisableParams::default()).await {
            debug!("Network.disable failed during detach: {}", e);
        }
        if let Err(e) = self.page.execute(console::DisableParams::default()).await {
            debug!("Console.disable failed during detach: {}", e);
        }
        Ok(())
    }

    async fn enable(&self, stream: &str) -> Result<(), ChannelError> {
        match stream {
            "Network" => self
                .page
                .execute(network::EnableParams::default())
                .await
                .map(|_| ())
                .map_err(|e| ChannelError::Enable {
                    stream: stream.to_string(),
                    reason: e.to_string(),
                }),
            "Console" => self
                .page
                .execute(console::EnableParams::default())
                .await
                .map(|_| ())
                .map_err(|e| ChannelError::Enable {
                    stream: stream.to_string(),
                    reason: e.to_string(),
                }),
            other => Err(ChannelError::Enable {
                stream: other.to_string(),
                reason: "unknown stream".to_string(),
            }),
        }
    }

    async fn fetch_body(&self, request_id: &str) -> Result<ResponseBody, ChannelError> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(request_id.to_string()))
            .await
            .map_err(|e| ChannelError::BodyFetch {
                request_id: request_id.to_string(),
                reason: e.to_string(),
            })?;

        let result = response.result;
        Ok(ResponseBody {
            body: result.body,
            base64_encoded: result.base64_encoded,
        })
    }
}
